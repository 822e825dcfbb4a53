//! Text rendering of near-field depth coverage.
//!
//! The map is cut into cells `CELL_WIDTH` pixels wide and `CELL_HEIGHT` rows tall.
//! Each cell counts pixels with a valid reading closer than `near_m` and prints one
//! character from `RAMP`, indexed by `count / RAMP_STEP`.

use crate::frame::DepthMap;

pub const CELL_WIDTH: u32 = 10;
pub const CELL_HEIGHT: u32 = 20;
pub const RAMP: &[u8] = b" .:nhBXWW";
pub const RAMP_STEP: u32 = 25;

/// One string per band of `CELL_HEIGHT` rows. A trailing partial band is included.
pub fn render<D: DepthMap + ?Sized>(depth: &D, near_m: f32) -> Vec<String> {
    let columns = depth.width().div_ceil(CELL_WIDTH) as usize;
    let mut lines = Vec::new();
    let mut counts = vec![0u32; columns];

    for y in 0..depth.height() {
        for x in 0..depth.width() {
            let d = depth.distance_at(x, y);
            if d > 0.0 && d < near_m {
                counts[(x / CELL_WIDTH) as usize] += 1;
            }
        }
        let band_done = y % CELL_HEIGHT == CELL_HEIGHT - 1 || y + 1 == depth.height();
        if band_done {
            lines.push(counts.iter().map(|&c| ramp_char(c)).collect());
            counts.iter_mut().for_each(|c| *c = 0);
        }
    }
    lines
}

fn ramp_char(count: u32) -> char {
    let idx = ((count / RAMP_STEP) as usize).min(RAMP.len() - 1);
    RAMP[idx] as char
}
