// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

use std::any::Any;

use crate::render::{
    InputRows, OutputRows, RenderPipelineChannelMode, RenderPipelineStage, StageSettings,
};

/// Noise strength as a piecewise linear function of intensity.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct NoiseParams {
    pub lut: [f32; NoiseParams::NUM_POINTS],
}

impl NoiseParams {
    pub const NUM_POINTS: usize = 8;

    pub fn strength(&self, vx: f32) -> f32 {
        const SCALE: usize = NoiseParams::NUM_POINTS - 2;
        let scaled = (vx * SCALE as f32).max(0.0);
        let (floor, frac) = if scaled >= (SCALE + 1) as f32 {
            (SCALE, 1.0)
        } else {
            let floor = scaled.floor();
            (floor as usize, scaled - floor)
        };
        let low = self.lut[floor];
        let high = self.lut[floor + 1];
        (high - low).mul_add(frac, low).clamp(0.0, 1.0)
    }
}

/// High-pass filters the three random channels starting at `first_channel`.
pub struct ConvolveNoiseStage {
    first_channel: usize,
}

impl ConvolveNoiseStage {
    pub fn new(first_channel: usize) -> ConvolveNoiseStage {
        ConvolveNoiseStage { first_channel }
    }

    fn uses_channel(&self, c: usize) -> bool {
        (self.first_channel..self.first_channel + 3).contains(&c)
    }
}

impl std::fmt::Display for ConvolveNoiseStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "convolve noise for channels [{},{},{}]",
            self.first_channel,
            self.first_channel + 1,
            self.first_channel + 2
        )
    }
}

impl RenderPipelineStage for ConvolveNoiseStage {
    fn settings(&self) -> StageSettings {
        StageSettings::symmetric_border_only(2)
    }

    fn channel_mode(&self, c: usize) -> RenderPipelineChannelMode {
        if self.uses_channel(c) {
            RenderPipelineChannelMode::InOut
        } else {
            RenderPipelineChannelMode::Ignored
        }
    }

    fn process_row(
        &self,
        input_rows: &InputRows<'_>,
        output_rows: &mut OutputRows<'_>,
        xextra: usize,
        xsize: usize,
        _xpos: usize,
        _ypos: usize,
        _state: Option<&mut (dyn Any + Send)>,
    ) {
        for c in self.first_channel..self.first_channel + 3 {
            let input = &input_rows[c];
            let output = &mut output_rows[c][0];
            for x in 0..xsize + 2 * xextra {
                let mut others = 0.0;
                for (dy, row) in input.iter().enumerate() {
                    for dx in 0..5 {
                        if dy != 2 || dx != 2 {
                            others += row[x + dx];
                        }
                    }
                }
                output[x] = others.mul_add(0.16, input[2][x + 2] * -3.84);
            }
        }
    }
}

/// Adds the convolved random channels starting at `first_noise_channel` to the color
/// channels 0, 1 and 2, scaled by the local intensity.
pub struct AddNoiseStage {
    noise: NoiseParams,
    ytox: f32,
    ytob: f32,
    first_noise_channel: usize,
}

impl AddNoiseStage {
    pub fn new(noise: NoiseParams, ytox: f32, ytob: f32, first_noise_channel: usize) -> Self {
        assert!(first_noise_channel > 2);
        AddNoiseStage {
            noise,
            ytox,
            ytob,
            first_noise_channel,
        }
    }
}

impl std::fmt::Display for AddNoiseStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "add noise from channels [{},{},{}]",
            self.first_noise_channel,
            self.first_noise_channel + 1,
            self.first_noise_channel + 2
        )
    }
}

impl RenderPipelineStage for AddNoiseStage {
    fn channel_mode(&self, c: usize) -> RenderPipelineChannelMode {
        if c < 3 {
            RenderPipelineChannelMode::InPlace
        } else if (self.first_noise_channel..self.first_noise_channel + 3).contains(&c) {
            RenderPipelineChannelMode::Input
        } else {
            RenderPipelineChannelMode::Ignored
        }
    }

    fn process_row(
        &self,
        input_rows: &InputRows<'_>,
        output_rows: &mut OutputRows<'_>,
        xextra: usize,
        xsize: usize,
        _xpos: usize,
        _ypos: usize,
        _state: Option<&mut (dyn Any + Send)>,
    ) {
        const NORM: f32 = 0.22;
        const RG_CORR: f32 = 0.9921875;
        const RGN_CORR: f32 = 0.0078125;

        let first = self.first_noise_channel;
        let rnd_r = input_rows[first][0];
        let rnd_g = input_rows[first + 1][0];
        let rnd_c = input_rows[first + 2][0];
        let [row_x, row_y, row_b, ..] = output_rows else {
            panic!("noise needs 3 color channels");
        };
        let (row_x, row_y, row_b) = (&mut row_x[0], &mut row_y[0], &mut row_b[0]);
        for x in 0..xsize + 2 * xextra {
            let vx = row_x[x];
            let vy = row_y[x];
            let strength_g = self.noise.strength(0.5 * (vy - vx));
            let strength_r = self.noise.strength(0.5 * (vy + vx));
            let correlated = rnd_c[x] * NORM;
            let red = strength_r * RGN_CORR.mul_add(rnd_r[x] * NORM, RG_CORR * correlated);
            let green = strength_g * RGN_CORR.mul_add(rnd_g[x] * NORM, RG_CORR * correlated);
            let rg = red + green;
            row_x[x] += self.ytox.mul_add(rg, red - green);
            row_y[x] += rg;
            row_b[x] = self.ytob.mul_add(rg, row_b[x]);
        }
    }
}

#[cfg(test)]
mod test {
    use test_log::test;

    use super::*;
    use crate::error::Result;
    use crate::frame_dimensions::FrameDimensions;
    use crate::image::Image;
    use crate::render::test::{check_idempotent, run_pipeline, test_stage_consistency};
    use crate::util::test::{assert_all_almost_eq, assert_almost_eq};

    fn ramp(size: (usize, usize), start: f32, step: f32) -> Result<Image<f32>> {
        let mut image = Image::new(size)?;
        for y in 0..size.1 {
            for (x, v) in image.row_mut(y).iter_mut().enumerate() {
                *v = start + step * (y * size.0 + x) as f32;
            }
        }
        Ok(image)
    }

    #[test]
    fn strength_interpolates_and_clamps() {
        let noise = NoiseParams {
            lut: [0.0, 0.6, 0.2, 0.4, 0.8, 1.5, 0.3, 0.9],
        };
        assert_almost_eq!(noise.strength(-1.0), 0.0, 1e-6);
        assert_almost_eq!(noise.strength(0.25), 0.4, 1e-6);
        assert_almost_eq!(noise.strength(0.75), 1.0, 1e-6);
        assert_almost_eq!(noise.strength(1.0), 0.3, 1e-6);
        assert_almost_eq!(noise.strength(1.1), 0.66, 1e-5);
        assert_almost_eq!(noise.strength(5.0), 0.9, 1e-6);
    }

    #[test]
    fn convolve_on_mirrored_ramp() -> Result<()> {
        let fd = FrameDimensions::new((2, 2), 8, 0)?;
        let output = run_pipeline(
            3,
            fd,
            vec![Box::new(ConvolveNoiseStage::new(0))],
            true,
            &[0],
            &|_, size| ramp(size, 0.0, 1.0),
        )?;
        for image in output.iter() {
            assert_all_almost_eq!(image.row(0), &[7.2, 2.4], 1e-5);
            assert_all_almost_eq!(image.row(1), &[-2.4, -7.2], 1e-5);
        }
        Ok(())
    }

    #[test]
    fn convolve_consistency() -> Result<()> {
        test_stage_consistency(3, (500, 500), || {
            Ok(vec![Box::new(ConvolveNoiseStage::new(0))])
        })
    }

    #[test]
    fn add_noise_with_saturated_strength() -> Result<()> {
        let noise = NoiseParams {
            lut: [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0],
        };
        let stage = AddNoiseStage::new(noise, 0.0, 1.0, 3);
        let fd = FrameDimensions::new((8, 8), 8, 0)?;
        let output = run_pipeline(6, fd, vec![Box::new(stage)], true, &[0], &|_, size| {
            ramp(size, 0.1, 0.1)
        })?;
        let input = ramp((8, 8), 0.1, 0.1)?;
        for y in 0..8 {
            let expected: Vec<f32> = input.row(y).iter().map(|v| v * 1.44).collect();
            assert_all_almost_eq!(output[0].row(y), input.row(y), 1e-5);
            assert_all_almost_eq!(output[1].row(y), &expected, 1e-5);
            assert_all_almost_eq!(output[2].row(y), &expected, 1e-5);
        }
        Ok(())
    }

    #[test]
    fn add_noise_consistency() -> Result<()> {
        test_stage_consistency(6, (500, 500), || {
            let noise = NoiseParams {
                lut: [0.0, 2.0, 1.0, 0.0, 1.0, 3.0, 1.1, 2.3],
            };
            Ok(vec![Box::new(AddNoiseStage::new(noise, 0.3, 0.9, 3))])
        })
    }

    #[test]
    fn idempotent() {
        check_idempotent(&ConvolveNoiseStage::new(0), 3);
        let noise = NoiseParams {
            lut: [0.0, 2.0, 1.0, 0.0, 1.0, 3.0, 1.1, 2.3],
        };
        check_idempotent(&AddNoiseStage::new(noise, 0.3, 0.9, 3), 6);
    }
}
