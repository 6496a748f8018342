// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

use std::any::Any;
use std::sync::Arc;

use crate::{
    error::{Error, Result},
    image::Image,
    render::{
        ImageDimensions, InputRows, OutputRows, RenderPipelineChannelMode, RenderPipelineStage,
    },
    util::tracing_wrappers::*,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlendMode {
    /// The frame covers the background.
    Replace,
    /// The frame is added to the background.
    Add,
}

/// Places the frame on the image canvas, on top of an optional background frame. Stages after
/// this one see the whole canvas; areas not covered by the frame are taken from the background,
/// or are zero if there is none.
pub struct BlendingStage {
    mode: BlendMode,
    dimensions: ImageDimensions,
    num_channels: usize,
    background: Option<Arc<Vec<Image<f32>>>>,
    initialized: bool,
}

impl BlendingStage {
    pub fn new(
        mode: BlendMode,
        dimensions: ImageDimensions,
        num_channels: usize,
        background: Option<Arc<Vec<Image<f32>>>>,
    ) -> BlendingStage {
        BlendingStage {
            mode,
            dimensions,
            num_channels,
            background,
            initialized: false,
        }
    }

    fn background_matches(&self) -> bool {
        let Some(background) = &self.background else {
            return true;
        };
        if background.len() != self.num_channels {
            warn!(
                expected = self.num_channels,
                found = background.len(),
                "background has the wrong number of channels"
            );
            return false;
        }
        background.iter().all(|image| {
            let matches = image.size() == self.dimensions.image_size;
            if !matches {
                warn!(
                    "{}",
                    Error::BackgroundSizeMismatch(
                        image.size().0,
                        image.size().1,
                        self.dimensions.image_size.0,
                        self.dimensions.image_size.1
                    )
                );
            }
            matches
        })
    }

    fn background_value(&self, c: usize, x: isize, y: isize) -> f32 {
        let (w, h) = self.dimensions.image_size;
        match &self.background {
            Some(background) if (0..w as isize).contains(&x) && (0..h as isize).contains(&y) => {
                background[c].row(y as usize)[x as usize]
            }
            _ => 0.0,
        }
    }
}

impl std::fmt::Display for BlendingStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (w, h) = self.dimensions.image_size;
        let (x0, y0) = self.dimensions.frame_origin;
        write!(
            f,
            "blending ({:?}) of {} channels at {x0},{y0} on a {w}x{h} canvas",
            self.mode, self.num_channels
        )
    }
}

impl RenderPipelineStage for BlendingStage {
    fn channel_mode(&self, c: usize) -> RenderPipelineChannelMode {
        if c < self.num_channels {
            RenderPipelineChannelMode::InPlace
        } else {
            RenderPipelineChannelMode::Ignored
        }
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn set_input_sizes(&mut self, sizes: &[(usize, usize)]) -> Result<()> {
        if sizes.len() != self.num_channels {
            return Err(Error::ChannelCountMismatch(self.num_channels, sizes.len()));
        }
        self.initialized = self.background_matches();
        Ok(())
    }

    fn image_dimensions(&self) -> Option<ImageDimensions> {
        Some(self.dimensions)
    }

    fn process_row(
        &self,
        _input_rows: &InputRows<'_>,
        output_rows: &mut OutputRows<'_>,
        xextra: usize,
        xsize: usize,
        xpos: usize,
        ypos: usize,
        _state: Option<&mut (dyn Any + Send)>,
    ) {
        if self.mode == BlendMode::Replace {
            return;
        }
        let (x0, y0) = self.dimensions.frame_origin;
        let y = ypos as isize + y0;
        let first_x = xpos as isize - xextra as isize + x0;
        for (c, rows) in output_rows.iter_mut().take(self.num_channels).enumerate() {
            for (x, v) in (first_x..).zip(rows[0].iter_mut().take(xsize + 2 * xextra)) {
                *v += self.background_value(c, x, y);
            }
        }
    }

    fn process_padding_row(&self, rows: &mut [&mut [f32]], xsize: usize, xpos: usize, ypos: usize) {
        for (c, row) in rows.iter_mut().enumerate() {
            match &self.background {
                Some(background) => {
                    row[..xsize].copy_from_slice(&background[c].row(ypos)[xpos..xpos + xsize])
                }
                None => row[..xsize].fill(0.0),
            }
        }
    }
}
