// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

use std::any::Any;

use crate::render::{
    InputRows, OutputRows, RenderPipelineChannelMode, RenderPipelineStage, StageSettings,
};

pub struct NearestNeighbourUpsample {
    channel: usize,
}

impl NearestNeighbourUpsample {
    pub fn new(channel: usize) -> NearestNeighbourUpsample {
        NearestNeighbourUpsample { channel }
    }
}

impl std::fmt::Display for NearestNeighbourUpsample {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "2x2 nearest neighbour upsample of channel {}",
            self.channel
        )
    }
}

impl RenderPipelineStage for NearestNeighbourUpsample {
    fn settings(&self) -> StageSettings {
        StageSettings::symmetric(1, 0)
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
        let input = input_rows[self.channel][0];
        for output in output_rows[self.channel].iter_mut() {
            for (pair, v) in output
                .chunks_exact_mut(2)
                .zip(input.iter().take(xsize + 2 * xextra))
            {
                pair.fill(*v);
            }
        }
    }
}
