use once_cell::sync::Lazy;

/// Base Spectrum colours: 8 normal, 8 bright.
pub const BASE_COLOURS: usize = 16;

/// Extended palette: base colours then one slot per unordered pair of
/// distinct base colours.
pub const PALETTE_SIZE: usize = BASE_COLOURS + BASE_COLOURS * (BASE_COLOURS - 1) / 2;

/// Packed palette indices for 4 pixels, indexed by bitmap nibble then
/// attribute byte. Byte 0 is the leftmost pixel. Flash is applied by the
/// caller inverting the bitmap, so the flash bit only selects a duplicate row.
pub static ALU_BYTES: Lazy<Box<[[u32; 256]; 16]>> = Lazy::new(|| {
    let mut table = Box::new([[0u32; 256]; 16]);
    for (nibble, row) in table.iter_mut().enumerate() {
        for (attribute, packed) in row.iter_mut().enumerate() {
            let bright = (attribute & 0x40) >> 3;
            let ink = ((attribute & 0x07) | bright) as u8;
            let paper = (((attribute >> 3) & 0x07) | bright) as u8;
            let px = [paper, ink];
            *packed = u32::from_le_bytes([
                px[(nibble >> 3) & 1],
                px[(nibble >> 2) & 1],
                px[(nibble >> 1) & 1],
                px[nibble & 1],
            ]);
        }
    }
    table
});

/// Palette slot showing the average of two fields.
pub static BLEND: Lazy<[[u8; BASE_COLOURS]; BASE_COLOURS]> = Lazy::new(|| {
    let mut table = [[0u8; BASE_COLOURS]; BASE_COLOURS];
    for (prev, row) in table.iter_mut().enumerate() {
        for (cur, slot) in row.iter_mut().enumerate() {
            *slot = if prev == cur {
                cur as u8
            } else {
                pair_slot(prev.min(cur), prev.max(cur)) as u8
            };
        }
    }
    table
});

/// RGB for every slot of the extended palette.
pub static PALETTE: Lazy<Vec<[u8; 3]>> = Lazy::new(|| {
    let mut palette: Vec<[u8; 3]> = (0..BASE_COLOURS).map(base_rgb).collect();
    palette.resize(PALETTE_SIZE, [0; 3]);
    for a in 0..BASE_COLOURS {
        for b in (a + 1)..BASE_COLOURS {
            let (ca, cb) = (base_rgb(a), base_rgb(b));
            palette[pair_slot(a, b)] = [
                ((ca[0] as u16 + cb[0] as u16) / 2) as u8,
                ((ca[1] as u16 + cb[1] as u16) / 2) as u8,
                ((ca[2] as u16 + cb[2] as u16) / 2) as u8,
            ];
        }
    }
    palette
});

fn pair_slot(low: usize, high: usize) -> usize {
    // pairs (low, high) with low < high, enumerated row by row
    let before: usize = (0..low).map(|row| BASE_COLOURS - 1 - row).sum();
    BASE_COLOURS + before + (high - low - 1)
}

/// GRB colour bits, bright raises the level from 0xD7 to 0xFF.
fn base_rgb(index: usize) -> [u8; 3] {
    let level = if index & 8 != 0 { 0xFF } else { 0xD7 };
    let on = |bit: usize| if index & bit != 0 { level } else { 0 };
    [on(2), on(4), on(1)]
}

/// Expands a frame of palette indices into RGBA bytes.
pub fn to_rgba(frame: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(frame.len() * 4);
    for &index in frame {
        let [r, g, b] = PALETTE
            .as_slice()
            .get(index as usize)
            .copied()
            .unwrap_or([0; 3]);
        out.extend_from_slice(&[r, g, b, 0xFF]);
    }
    out
}
