// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

use std::any::Any;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::{
    error::Result,
    image::Image,
    render::{InputRows, OutputRows, RenderPipelineChannelMode, RenderPipelineStage},
};

/// Planar copy of the rendered channels, shared between a [`SaveToImageStage`] and its users.
#[derive(Clone, Default)]
pub struct SavedFrame {
    images: Arc<Mutex<Vec<Image<f32>>>>,
}

impl SavedFrame {
    /// Returns the saved images, in the order of the channels given to the stage.
    pub fn lock(&self) -> MutexGuard<'_, Vec<Image<f32>>> {
        self.images.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Takes the saved images out, leaving the frame empty.
    pub fn take(&self) -> Vec<Image<f32>> {
        std::mem::take(&mut *self.lock())
    }
}

/// Stores the channels it sees into full-size `f32` images, for use as a reference frame.
pub struct SaveToImageStage {
    channels: Vec<usize>,
    frame: SavedFrame,
}

impl SaveToImageStage {
    pub fn new(channels: &[usize]) -> SaveToImageStage {
        SaveToImageStage {
            channels: channels.to_vec(),
            frame: SavedFrame::default(),
        }
    }

    pub fn frame(&self) -> SavedFrame {
        self.frame.clone()
    }
}

impl std::fmt::Display for SaveToImageStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "save channels {:?}", self.channels)
    }
}

impl RenderPipelineStage for SaveToImageStage {
    fn channel_mode(&self, c: usize) -> RenderPipelineChannelMode {
        if self.channels.contains(&c) {
            RenderPipelineChannelMode::Input
        } else {
            RenderPipelineChannelMode::Ignored
        }
    }

    fn is_initialized(&self) -> bool {
        self.frame.lock().len() == self.channels.len()
    }

    fn set_input_sizes(&mut self, sizes: &[(usize, usize)]) -> Result<()> {
        let images = self
            .channels
            .iter()
            .filter(|c| **c < sizes.len())
            .map(|c| Image::new(sizes[*c]))
            .collect::<Result<Vec<_>>>()?;
        *self.frame.lock() = images;
        Ok(())
    }

    fn process_row(
        &self,
        input_rows: &InputRows<'_>,
        _output_rows: &mut OutputRows<'_>,
        xextra: usize,
        xsize: usize,
        xpos: usize,
        ypos: usize,
        _state: Option<&mut (dyn Any + Send)>,
    ) {
        let mut images = self.frame.lock();
        for (image, c) in images.iter_mut().zip(self.channels.iter()) {
            let (width, height) = image.size();
            if ypos >= height || xpos >= width {
                continue;
            }
            let len = xsize.min(width - xpos);
            let input = &input_rows[*c][0][xextra..xextra + len];
            image.row_mut(ypos)[xpos..xpos + len].copy_from_slice(input);
        }
    }
}
