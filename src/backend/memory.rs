use super::{check_len, BufferId};
use crate::error::{NetError, Result};

/// Contents of one allocated buffer
#[derive(Debug, Clone)]
enum Storage {
    Float(Vec<f32>),
    Index(Vec<u32>),
}

/// Buffer arena for backends that keep their memory on the host
///
/// Buffers are never freed individually; the arena lives as long as the backend
/// that owns it, which in turn lives as long as its network.
#[derive(Debug, Default)]
pub struct DeviceMemory {
    buffers: Vec<Storage>,
    allocated_floats: usize,
}

impl DeviceMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&mut self, len: usize) -> BufferId {
        self.allocated_floats += len;
        self.buffers.push(Storage::Float(vec![0.0; len]));
        BufferId::new(self.buffers.len() - 1)
    }

    pub fn allocate_indices(&mut self, len: usize) -> BufferId {
        self.buffers.push(Storage::Index(vec![0; len]));
        BufferId::new(self.buffers.len() - 1)
    }

    /// Number of buffers allocated so far
    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    /// Total floats across every float buffer
    pub fn allocated_floats(&self) -> usize {
        self.allocated_floats
    }

    pub fn floats(&self, id: BufferId) -> Result<&[f32]> {
        match self.slot(id)? {
            Storage::Float(data) => Ok(data.as_slice()),
            Storage::Index(_) => Err(wrong_kind(id, "float")),
        }
    }

    pub fn floats_mut(&mut self, id: BufferId) -> Result<&mut [f32]> {
        match self.slot_mut(id)? {
            Storage::Float(data) => Ok(data.as_mut_slice()),
            Storage::Index(_) => Err(wrong_kind(id, "float")),
        }
    }

    pub fn indices(&self, id: BufferId) -> Result<&[u32]> {
        match self.slot(id)? {
            Storage::Index(data) => Ok(data.as_slice()),
            Storage::Float(_) => Err(wrong_kind(id, "index")),
        }
    }

    pub fn write(&mut self, id: BufferId, data: &[f32]) -> Result<()> {
        let target = self.floats_mut(id)?;
        check_len("write", id, target.len(), data.len())?;
        target.copy_from_slice(data);
        Ok(())
    }

    pub fn write_indices(&mut self, id: BufferId, data: &[u32]) -> Result<()> {
        match self.slot_mut(id)? {
            Storage::Index(target) => {
                check_len("write_indices", id, target.len(), data.len())?;
                target.copy_from_slice(data);
                Ok(())
            }
            Storage::Float(_) => Err(wrong_kind(id, "index")),
        }
    }

    pub fn read(&self, id: BufferId) -> Result<Vec<f32>> {
        Ok(self.floats(id)?.to_vec())
    }

    /// Move a float buffer out of the arena so it can be written while other
    /// buffers are read. Must be handed back with [`DeviceMemory::restore`].
    pub fn take(&mut self, id: BufferId) -> Result<Vec<f32>> {
        match self.slot_mut(id)? {
            Storage::Float(data) => Ok(std::mem::take(data)),
            Storage::Index(_) => Err(wrong_kind(id, "float")),
        }
    }

    pub fn restore(&mut self, id: BufferId, data: Vec<f32>) -> Result<()> {
        match self.slot_mut(id)? {
            Storage::Float(slot) => {
                *slot = data;
                Ok(())
            }
            Storage::Index(_) => Err(wrong_kind(id, "float")),
        }
    }

    /// Run `f` with the `outputs` buffers moved out for writing and every other
    /// buffer readable through the arena. Outputs are restored even when `f` fails.
    pub fn with_outputs<F>(&mut self, outputs: &[BufferId], f: F) -> Result<()>
    where
        F: FnOnce(&DeviceMemory, &mut [Vec<f32>]) -> Result<()>,
    {
        let mut taken = Vec::with_capacity(outputs.len());
        for &id in outputs {
            match self.take(id) {
                Ok(data) => taken.push(data),
                Err(e) => {
                    for (&id, data) in outputs.iter().zip(taken) {
                        self.restore(id, data)?;
                    }
                    return Err(e);
                }
            }
        }

        let result = f(self, &mut taken);
        for (&id, data) in outputs.iter().zip(taken) {
            self.restore(id, data)?;
        }
        result
    }

    fn slot(&self, id: BufferId) -> Result<&Storage> {
        self.buffers
            .get(id.index())
            .ok_or_else(|| NetError::backend("buffer access", format!("unknown {}", id)))
    }

    fn slot_mut(&mut self, id: BufferId) -> Result<&mut Storage> {
        self.buffers
            .get_mut(id.index())
            .ok_or_else(|| NetError::backend("buffer access", format!("unknown {}", id)))
    }
}

fn wrong_kind(id: BufferId, expected: &str) -> NetError {
    NetError::backend("buffer access", format!("{} does not hold {} data", id, expected))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffers_are_zero_filled() {
        let mut memory = DeviceMemory::new();
        let id = memory.allocate(4);
        assert_eq!(memory.read(id).unwrap(), vec![0.0; 4]);
        assert_eq!(memory.allocated_floats(), 4);
    }

    #[test]
    fn test_write_checks_length_and_kind() {
        let mut memory = DeviceMemory::new();
        let floats = memory.allocate(3);
        let indices = memory.allocate_indices(2);

        assert!(memory.write(floats, &[1.0, 2.0]).unwrap_err().is_backend());
        assert!(memory.write(indices, &[1.0, 2.0]).unwrap_err().is_backend());
        memory.write_indices(indices, &[7, 9]).unwrap();
        assert_eq!(memory.indices(indices).unwrap(), &[7, 9]);
        assert!(memory.read(BufferId::new(99)).is_err());
    }

    #[test]
    fn test_take_and_restore() {
        let mut memory = DeviceMemory::new();
        let id = memory.allocate(2);
        memory.write(id, &[1.0, 2.0]).unwrap();

        let mut data = memory.take(id).unwrap();
        assert!(memory.floats(id).unwrap().is_empty());
        data[0] = 5.0;
        memory.restore(id, data).unwrap();
        assert_eq!(memory.read(id).unwrap(), vec![5.0, 2.0]);
    }
}
