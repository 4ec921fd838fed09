use std::ops::Range;
use std::sync::RwLock;

use crate::upvc_err::{Result, UpvcError};

/// Byte-addressable, non-cached memory local to one unit.
///
/// Host transfers and on-unit tasklets share it; each access copies a whole
/// region in or out under the lock, so a region is never observed half
/// written.
pub struct Mram {
    data: RwLock<Vec<u8>>,
    size: usize,
}

fn checked_range(addr: usize, len: usize, size: usize) -> Result<Range<usize>> {
    match addr.checked_add(len) {
        Some(end) if end <= size => Ok(addr..end),
        _ => Err(UpvcError::Transport(format!(
            "MRAM access of {} bytes at {:#x} is outside the {} byte MRAM",
            len, addr, size
        ))),
    }
}

impl Mram {
    pub fn new(size: usize) -> Mram {
        Mram {
            data: RwLock::new(vec![0_u8; size]),
            size,
        }
    }
    pub fn size(&self) -> usize {
        self.size
    }
    pub fn read(&self, addr: usize, buf: &mut [u8]) -> Result<()> {
        let range = checked_range(addr, buf.len(), self.size)?;
        let data = self.data.read()?;
        buf.copy_from_slice(&data[range]);
        Ok(())
    }
    pub fn write(&self, addr: usize, buf: &[u8]) -> Result<()> {
        let range = checked_range(addr, buf.len(), self.size)?;
        let mut data = self.data.write()?;
        data[range].copy_from_slice(buf);
        Ok(())
    }
    pub fn read_u64(&self, addr: usize) -> Result<u64> {
        let mut buf = [0_u8; 8];
        self.read(addr, &mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }
    pub fn write_u64(&self, addr: usize, value: u64) -> Result<()> {
        self.write(addr, &value.to_le_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_write() {
        let mram = Mram::new(64);
        mram.write(8, &[1, 2, 3]).unwrap();
        let mut buf = [0_u8; 4];
        mram.read(7, &mut buf).unwrap();
        assert_eq!(buf, [0, 1, 2, 3]);
        mram.write_u64(56, 0xdead_beef).unwrap();
        assert_eq!(mram.read_u64(56).unwrap(), 0xdead_beef);
    }
    #[test]
    fn test_out_of_range() {
        let mram = Mram::new(64);
        let mut buf = [0_u8; 16];
        assert!(matches!(mram.read(56, &mut buf), Err(UpvcError::Transport(_))));
        assert!(matches!(mram.write(usize::MAX, &buf), Err(UpvcError::Transport(_))));
        assert!(mram.read(48, &mut buf).is_ok());
    }
}
