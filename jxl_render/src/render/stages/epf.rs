// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

use std::{any::Any, sync::Arc};

use crate::{
    error::{Error, Result},
    image::Image,
    render::{
        InputRows, OutputRows, RenderPipelineChannelMode, RenderPipelineStage, StageSettings,
    },
    util::tracing_wrappers::*,
};

const BLOCK_DIM: usize = 8;

/// Numerator of the inverse sigma values stored in the sigma image.
pub const INV_SIGMA_NUM: f32 = -1.171_572_9;

/// Blocks whose inverse sigma is below this value are left untouched.
pub const MIN_SIGMA: f32 = -3.905_243;

const SAD_MUL: f32 = 1.65;

// (dx, dy) offsets.
const PLUS: [(isize, isize); 4] = [(0, -1), (-1, 0), (1, 0), (0, 1)];
const DIAMOND: [(isize, isize); 12] = [
    (0, -2),
    (-1, -1),
    (0, -1),
    (1, -1),
    (-2, 0),
    (-1, 0),
    (1, 0),
    (2, 0),
    (-1, 1),
    (0, 1),
    (1, 1),
    (0, 2),
];
const PLUS_PATCH: [(isize, isize); 5] = [(0, 0), (0, -1), (-1, 0), (1, 0), (0, 1)];
const CENTER_PATCH: [(isize, isize); 1] = [(0, 0)];

/// One iteration of the edge-preserving filter. Up to three iterations run in sequence,
/// each with a smaller support than the previous one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EpfStep {
    /// 12 neighbours within distance 2, compared over plus-shaped patches.
    Step0,
    /// The 4 direct neighbours, compared over plus-shaped patches.
    Step1,
    /// The 4 direct neighbours, compared pixel by pixel.
    Step2,
}

impl EpfStep {
    fn neighbours(&self) -> &'static [(isize, isize)] {
        match self {
            EpfStep::Step0 => &DIAMOND,
            EpfStep::Step1 | EpfStep::Step2 => &PLUS,
        }
    }

    fn patch(&self) -> &'static [(isize, isize)] {
        match self {
            EpfStep::Step0 | EpfStep::Step1 => &PLUS_PATCH,
            EpfStep::Step2 => &CENTER_PATCH,
        }
    }

    fn border(&self) -> u8 {
        match self {
            EpfStep::Step0 => 3,
            EpfStep::Step1 => 2,
            EpfStep::Step2 => 1,
        }
    }
}

/// Edge-preserving filter on channels 0, 1 and 2.
///
/// Every pixel becomes a weighted average of itself and its neighbours, where the weight of a
/// neighbour decreases with the distance between the patches around the two pixels. The
/// strength is given per 8x8 block by `sigma`, which holds `INV_SIGMA_NUM / sigma` for each
/// block of the filtered channels.
pub struct EpfStage {
    step: EpfStep,
    sigma_scale: f32,
    /// Multiplier of `sigma_scale` on the edges of each block.
    border_sad_mul: f32,
    channel_scale: [f32; 3],
    sigma: Arc<Image<f32>>,
}

impl EpfStage {
    pub fn new(
        step: EpfStep,
        sigma_scale: f32,
        border_sad_mul: f32,
        channel_scale: [f32; 3],
        sigma: Arc<Image<f32>>,
    ) -> EpfStage {
        EpfStage {
            step,
            sigma_scale,
            border_sad_mul,
            channel_scale,
            sigma,
        }
    }

    fn sigma_row(&self, ypos: usize) -> &[f32] {
        let by = (ypos / BLOCK_DIM).min(self.sigma.size().1 - 1);
        self.sigma.row(by)
    }
}

impl std::fmt::Display for EpfStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "EPF {:?} with sigma scale {} and border SAD multiplier {}",
            self.step, self.sigma_scale, self.border_sad_mul
        )
    }
}

fn pixel(rows: &[&[f32]], center: (usize, usize), offset: (isize, isize)) -> f32 {
    let y = center.1 as isize + offset.1;
    let x = center.0 as isize + offset.0;
    rows[y as usize][x as usize]
}

impl RenderPipelineStage for EpfStage {
    fn settings(&self) -> StageSettings {
        StageSettings::symmetric_border_only(self.step.border())
    }

    fn channel_mode(&self, c: usize) -> RenderPipelineChannelMode {
        if c < 3 {
            RenderPipelineChannelMode::InOut
        } else {
            RenderPipelineChannelMode::Ignored
        }
    }

    fn set_input_sizes(&mut self, sizes: &[(usize, usize)]) -> Result<()> {
        if sizes.len() < 3 {
            return Err(Error::InvalidChannel(2, sizes.len()));
        }
        let (xsize, ysize) = sizes[0];
        let blocks = (xsize.div_ceil(BLOCK_DIM), ysize.div_ceil(BLOCK_DIM));
        let (xblocks, yblocks) = self.sigma.size();
        if xblocks < blocks.0 || yblocks < blocks.1 || xblocks == 0 || yblocks == 0 {
            return Err(Error::SigmaImageTooSmall(xblocks, yblocks, blocks.0, blocks.1));
        }
        debug!(?blocks, step = ?self.step, "configured EPF");
        Ok(())
    }

    fn process_row(
        &self,
        input_rows: &InputRows<'_>,
        output_rows: &mut OutputRows<'_>,
        xextra: usize,
        xsize: usize,
        xpos: usize,
        ypos: usize,
        _state: Option<&mut (dyn Any + Send)>,
    ) {
        let border = self.step.border() as usize;
        let neighbours = self.step.neighbours();
        let patch = self.step.patch();
        let row_sigma = self.sigma_row(ypos);
        let last_block = row_sigma.len() - 1;

        let sm = self.sigma_scale * SAD_MUL;
        let bsm = sm * self.border_sad_mul;
        let block_edge_row = ypos % BLOCK_DIM == 0 || ypos % BLOCK_DIM == BLOCK_DIM - 1;

        let first_x = xpos as isize - xextra as isize;
        let mut sads = [0f32; DIAMOND.len()];
        for x in 0..xsize + 2 * xextra {
            let center = (x + border, border);
            let pos = first_x + x as isize;
            let block_sigma = row_sigma[(pos.div_euclid(BLOCK_DIM as isize).max(0) as usize)
                .min(last_block)];
            if block_sigma < MIN_SIGMA {
                for c in 0..3 {
                    output_rows[c][0][x] = pixel(&input_rows[c], center, (0, 0));
                }
                continue;
            }

            let ix = pos.rem_euclid(BLOCK_DIM as isize) as usize;
            let on_block_edge = block_edge_row || ix == 0 || ix == BLOCK_DIM - 1;
            let inv_sigma = block_sigma * if on_block_edge { bsm } else { sm };

            let sads = &mut sads[..neighbours.len()];
            sads.fill(0.0);
            for (rows, scale) in input_rows.iter().take(3).zip(self.channel_scale) {
                for (sad, &(nx, ny)) in sads.iter_mut().zip(neighbours) {
                    let mut distance = 0f32;
                    for &(px, py) in patch {
                        let here = pixel(rows, center, (px, py));
                        let there = pixel(rows, center, (nx + px, ny + py));
                        distance += (here - there).abs();
                    }
                    *sad = distance.mul_add(scale, *sad);
                }
            }

            let mut sum = [0f32; 3];
            for (c, s) in sum.iter_mut().enumerate() {
                *s = pixel(&input_rows[c], center, (0, 0));
            }
            let mut total_weight = 1.0f32;
            for (sad, &offset) in sads.iter().zip(neighbours) {
                let weight = sad.mul_add(inv_sigma, 1.0).max(0.0);
                total_weight += weight;
                for (c, s) in sum.iter_mut().enumerate() {
                    *s = weight.mul_add(pixel(&input_rows[c], center, offset), *s);
                }
            }
            let inv_weight = 1.0 / total_weight;
            for (c, s) in sum.iter().enumerate() {
                output_rows[c][0][x] = s * inv_weight;
            }
        }
    }
}
