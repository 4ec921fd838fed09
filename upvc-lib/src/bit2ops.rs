const A: u8 = 0x0;
const C: u8 = 0x1;
const T: u8 = 0x2;
const G: u8 = 0x3;

const NCHRS: usize = 1 << 8;
const INVALID: u8 = 0xff;
const NUCL_PER_BYTE: usize = 4;

pub fn cdiv(x: usize, y: usize) -> usize {
    (x + y - 1) / y
}

pub fn roundup(x: usize, y: usize) -> usize {
    cdiv(x, y) * y
}

const fn makebit2map() -> [u8; NCHRS] {
    let mut arr = [INVALID; NCHRS];
    arr['A' as usize] = A;
    arr['C' as usize] = C;
    arr['T' as usize] = T;
    arr['G' as usize] = G;
    arr['a' as usize] = A;
    arr['c' as usize] = C;
    arr['t' as usize] = T;
    arr['g' as usize] = G;
    arr
}
const fn mismatch_count_map() -> [u8; NCHRS] {
    let mut arr = [0_u8; NCHRS];
    let mut i = 0;
    while i < NCHRS {
        let x = i as u8;
        arr[i] = ((x | (x >> 1)) & 0x55).count_ones() as u8;
        i += 1;
    }
    arr
}

const STR_2_BIT2: [u8; NCHRS] = makebit2map();
/// Number of differing 2-bit symbols in a xor-ed byte.
const BYTE_MISMATCHES: [u8; NCHRS] = mismatch_count_map();

pub fn bit2_size(n_chrs: usize) -> usize {
    cdiv(n_chrs, NUCL_PER_BYTE)
}

/// Packs nucleotides four per byte, first nucleotide in the low bits.
/// Unknown characters are packed as `A`.
pub fn string_to_bit2(out_data: &mut [u8], data: &[u8]) {
    assert!(
        out_data.len() >= bit2_size(data.len()),
        "out data must be large enough to store result"
    );
    out_data[..bit2_size(data.len())].fill(0);
    for (idx, chr) in data.iter().enumerate() {
        let code = STR_2_BIT2[*chr as usize];
        let code = if code == INVALID { A } else { code };
        out_data[idx / NUCL_PER_BYTE] |= code << ((idx % NUCL_PER_BYTE) * 2);
    }
}
/// Counts the positions where two packed sequences hold different nucleotides.
pub fn bit2_mismatches(left: &[u8], right: &[u8]) -> u32 {
    left.iter()
        .zip(right.iter())
        .map(|(l, r)| BYTE_MISMATCHES[(l ^ r) as usize] as u32)
        .sum()
}
