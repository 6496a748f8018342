// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

use std::any::Any;

use crate::render::{
    InputRows, OutputRows, RenderPipelineChannelMode, RenderPipelineStage, StageSettings,
};

/// Apply Gabor-like filter to a channel.
#[derive(Debug)]
pub struct GaborishStage {
    channel: usize,
    kernel_top_bottom: [f32; 3],
    kernel_center: [f32; 3],
}

impl GaborishStage {
    pub fn new(channel: usize, weight1: f32, weight2: f32) -> Self {
        let weight_total = 1.0 + weight1 * 4.0 + weight2 * 4.0;
        let kernel_top_bottom = [weight2, weight1, weight2].map(|x| x / weight_total);
        let kernel_center = [weight1, 1.0, weight1].map(|x| x / weight_total);
        Self {
            channel,
            kernel_top_bottom,
            kernel_center,
        }
    }
}

impl std::fmt::Display for GaborishStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Gaborish filter for channel {}", self.channel)
    }
}

impl RenderPipelineStage for GaborishStage {
    fn settings(&self) -> StageSettings {
        StageSettings::symmetric_border_only(1)
    }

    fn channel_mode(&self, c: usize) -> RenderPipelineChannelMode {
        if c == self.channel {
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
        let rows_in = &input_rows[self.channel];
        let row_out = &mut output_rows[self.channel][0];
        let kernels = [
            self.kernel_top_bottom,
            self.kernel_center,
            self.kernel_top_bottom,
        ];
        for (x, out) in row_out.iter_mut().take(xsize + 2 * xextra).enumerate() {
            let mut sum = 0f32;
            for (row_in, kernel) in rows_in.iter().zip(kernels.iter()) {
                for (dx, weight) in kernel.iter().enumerate() {
                    sum = row_in[x + dx].mul_add(*weight, sum);
                }
            }
            *out = sum;
        }
    }
}
