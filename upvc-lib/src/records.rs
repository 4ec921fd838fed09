use crate::layout::{DPU_REQUEST_HEADER_SIZE, DPU_RESULT_SIZE, REQUEST_INFO_SIZE, REQUEST_MAGIC};

fn read_u32(data: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
}

/// Per-unit request header written by the host before each pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RequestInfo {
    pub nb_reads: u32,
    pub magic: u32,
}

impl RequestInfo {
    pub fn new(nb_reads: u32) -> RequestInfo {
        RequestInfo {
            nb_reads,
            magic: REQUEST_MAGIC,
        }
    }
    pub fn to_bytes(&self) -> [u8; REQUEST_INFO_SIZE] {
        let mut out = [0_u8; REQUEST_INFO_SIZE];
        out[0..4].copy_from_slice(&self.nb_reads.to_le_bytes());
        out[4..8].copy_from_slice(&self.magic.to_le_bytes());
        out
    }
    pub fn from_bytes(data: &[u8; REQUEST_INFO_SIZE]) -> RequestInfo {
        RequestInfo {
            nb_reads: read_u32(data, 0),
            magic: read_u32(data, 4),
        }
    }
}

/// Fixed header of a read record; the neighbour bytes follow it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DpuRequest {
    pub offset: u32,
    pub count: u32,
    pub num: u32,
}

impl DpuRequest {
    pub fn write_to(&self, out: &mut [u8]) {
        out[0..4].copy_from_slice(&self.offset.to_le_bytes());
        out[4..8].copy_from_slice(&self.count.to_le_bytes());
        out[8..12].copy_from_slice(&self.num.to_le_bytes());
    }
    /// Splits a record into its header and neighbour payload.
    pub fn parse(record: &[u8]) -> (DpuRequest, &[u8]) {
        let request = DpuRequest {
            offset: read_u32(record, 0),
            count: read_u32(record, 4),
            num: read_u32(record, 8),
        };
        (request, &record[DPU_REQUEST_HEADER_SIZE..])
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct DpuResultCoord {
    pub seed_nr: u32,
    pub seq_nr: u32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct DpuResultOut {
    pub num: u32,
    pub score: u32,
    pub coord: DpuResultCoord,
}

impl DpuResultOut {
    /// Marks the end of a unit's result buffer. Never produced by an alignment.
    pub const END_OF_RESULTS: DpuResultOut = DpuResultOut {
        num: u32::MAX,
        score: u32::MAX,
        coord: DpuResultCoord {
            seed_nr: 0,
            seq_nr: 0,
        },
    };

    pub fn is_end_marker(&self) -> bool {
        self.num == u32::MAX
    }
    pub fn to_bytes(&self) -> [u8; DPU_RESULT_SIZE] {
        let mut out = [0_u8; DPU_RESULT_SIZE];
        out[0..4].copy_from_slice(&self.num.to_le_bytes());
        out[4..8].copy_from_slice(&self.score.to_le_bytes());
        out[8..12].copy_from_slice(&self.coord.seed_nr.to_le_bytes());
        out[12..16].copy_from_slice(&self.coord.seq_nr.to_le_bytes());
        out
    }
    pub fn from_bytes(data: &[u8]) -> DpuResultOut {
        DpuResultOut {
            num: read_u32(data, 0),
            score: read_u32(data, 4),
            coord: DpuResultCoord {
                seed_nr: read_u32(data, 8),
                seq_nr: read_u32(data, 12),
            },
        }
    }
}

/// Additive sum of the little-endian 8-byte words of `data`.
///
/// Trailing bytes that do not fill a word are ignored; every region the
/// result pool writes is a multiple of 8 bytes.
pub fn compute_checksum(data: &[u8]) -> u64 {
    data.chunks_exact(8)
        .map(|word| u64::from_le_bytes([word[0], word[1], word[2], word[3], word[4], word[5], word[6], word[7]]))
        .fold(0_u64, |acc, word| acc.wrapping_add(word))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_wire_layout() {
        let res = DpuResultOut {
            num: 1,
            score: 2,
            coord: DpuResultCoord {
                seed_nr: 3,
                seq_nr: 4,
            },
        };
        let expected: [u8; 16] = [1, 0, 0, 0, 2, 0, 0, 0, 3, 0, 0, 0, 4, 0, 0, 0];
        assert_eq!(res.to_bytes(), expected);
        assert_eq!(DpuResultOut::from_bytes(&expected), res);
    }
    #[test]
    fn test_end_marker() {
        let bytes = DpuResultOut::END_OF_RESULTS.to_bytes();
        assert_eq!(&bytes[..8], &[0xff; 8]);
        assert!(DpuResultOut::from_bytes(&bytes).is_end_marker());
        assert!(!DpuResultOut::default().is_end_marker());
    }
    #[test]
    fn test_request_header_carries_magic() {
        let bytes = RequestInfo::new(3).to_bytes();
        assert_eq!(&bytes[4..], &0xcdef_abcd_u32.to_le_bytes());
        assert_eq!(RequestInfo::from_bytes(&bytes).nb_reads, 3);
    }
    #[test]
    fn test_request_parse() {
        let mut record = vec![0_u8; DPU_REQUEST_HEADER_SIZE + 4];
        DpuRequest {
            offset: 7,
            count: 2,
            num: 42,
        }
        .write_to(&mut record);
        record[DPU_REQUEST_HEADER_SIZE..].copy_from_slice(&[9, 8, 7, 6]);
        let (request, nbr) = DpuRequest::parse(&record);
        assert_eq!(request.num, 42);
        assert_eq!(request.offset, 7);
        assert_eq!(nbr, &[9, 8, 7, 6]);
    }
    #[test]
    fn test_checksum_is_word_sum() {
        let mut data = [0_u8; 16];
        data[0] = 1;
        data[8] = 2;
        data[15] = 1;
        assert_eq!(compute_checksum(&data), 3 + (1_u64 << 56));
        let all_ones = [0xff_u8; 16];
        assert_eq!(compute_checksum(&all_ones), u64::MAX.wrapping_add(u64::MAX));
    }
}
