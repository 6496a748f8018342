// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

use std::any::Any;
use std::sync::{Arc, Mutex, PoisonError};

use crate::{
    error::{Error, Result},
    image::ImageDataType,
    render::{InputRows, OutputRows, RenderPipelineChannelMode, RenderPipelineStage},
    util::tracing_wrappers::*,
};

/// Alpha values below this are treated as this value when unpremultiplying.
const SMALL_ALPHA: f32 = 1.0 / (1u32 << 26) as f32;

/// Interleaved pixels, `num_channels` samples per pixel, rows stored contiguously.
pub struct OutputBuffer<T: ImageDataType> {
    data: Vec<T>,
    size: (usize, usize),
    num_channels: usize,
}

impl<T: ImageDataType> OutputBuffer<T> {
    pub fn new(size: (usize, usize), num_channels: usize) -> Result<OutputBuffer<T>> {
        let len = size
            .0
            .checked_mul(size.1)
            .and_then(|x| x.checked_mul(num_channels))
            .ok_or(Error::ImageSizeTooLarge(size.0, size.1))?;
        let mut data = vec![];
        data.try_reserve_exact(len)?;
        data.resize(len, T::default());
        Ok(OutputBuffer {
            data,
            size,
            num_channels,
        })
    }

    pub fn size(&self) -> (usize, usize) {
        self.size
    }

    pub fn num_channels(&self) -> usize {
        self.num_channels
    }

    pub fn row(&self, y: usize) -> &[T] {
        let stride = self.size.0 * self.num_channels;
        &self.data[y * stride..(y + 1) * stride]
    }

    /// Samples of the pixel at `(x, y)`.
    pub fn pixel(&self, x: usize, y: usize) -> &[T] {
        let start = x * self.num_channels;
        &self.row(y)[start..start + self.num_channels]
    }

    pub fn data(&self) -> &[T] {
        &self.data
    }

    fn write(&mut self, x: usize, y: usize, pixels: &[T]) {
        let stride = self.size.0 * self.num_channels;
        let start = y * stride + x * self.num_channels;
        self.data[start..start + pixels.len()].copy_from_slice(pixels);
    }
}

pub type SharedOutputBuffer<T> = Arc<Mutex<OutputBuffer<T>>>;

/// Receives `(x, y, pixels)` for a run of interleaved pixels of one output row.
pub type RowCallback<T> = Box<dyn Fn(usize, usize, &[T]) + Send + Sync>;

enum OutputTarget<T: ImageDataType> {
    Buffer(SharedOutputBuffer<T>),
    Callback(RowCallback<T>),
}

/// Converts color channels (and optionally alpha) to interleaved samples of type `T`.
///
/// The output is the top-left `output_size` area of the image; flips are applied within that
/// area.
pub struct WriteToOutputStage<T: ImageDataType> {
    color_channels: Vec<usize>,
    alpha_channel: Option<usize>,
    unpremultiply_alpha: bool,
    flip_x: bool,
    flip_y: bool,
    output_size: (usize, usize),
    target: OutputTarget<T>,
}

impl<T: ImageDataType> WriteToOutputStage<T> {
    fn new(
        color_channels: &[usize],
        alpha_channel: Option<usize>,
        output_size: (usize, usize),
        target: OutputTarget<T>,
    ) -> Self {
        WriteToOutputStage {
            color_channels: color_channels.to_vec(),
            alpha_channel,
            unpremultiply_alpha: false,
            flip_x: false,
            flip_y: false,
            output_size,
            target,
        }
    }

    /// Writes into a newly allocated buffer of `output_size` pixels, available through
    /// [`WriteToOutputStage::buffer`].
    pub fn to_buffer(
        color_channels: &[usize],
        alpha_channel: Option<usize>,
        output_size: (usize, usize),
    ) -> Result<Self> {
        let num_channels = color_channels.len() + alpha_channel.map_or(0, |_| 1);
        let buffer = OutputBuffer::new(output_size, num_channels)?;
        Ok(Self::new(
            color_channels,
            alpha_channel,
            output_size,
            OutputTarget::Buffer(Arc::new(Mutex::new(buffer))),
        ))
    }

    /// Hands every converted run of pixels to `callback`, possibly from several threads.
    pub fn to_callback(
        color_channels: &[usize],
        alpha_channel: Option<usize>,
        output_size: (usize, usize),
        callback: RowCallback<T>,
    ) -> Self {
        Self::new(
            color_channels,
            alpha_channel,
            output_size,
            OutputTarget::Callback(callback),
        )
    }

    /// Divides color samples by alpha before conversion.
    pub fn with_unpremultiplied_alpha(mut self) -> Self {
        self.unpremultiply_alpha = true;
        self
    }

    /// Mirrors the output horizontally and/or vertically.
    pub fn with_flip(mut self, flip_x: bool, flip_y: bool) -> Self {
        self.flip_x = flip_x;
        self.flip_y = flip_y;
        self
    }

    /// The buffer written by this stage, if it writes to a buffer.
    pub fn buffer(&self) -> Option<SharedOutputBuffer<T>> {
        match &self.target {
            OutputTarget::Buffer(buffer) => Some(buffer.clone()),
            OutputTarget::Callback(_) => None,
        }
    }

    fn num_output_channels(&self) -> usize {
        self.color_channels.len() + self.alpha_channel.map_or(0, |_| 1)
    }
}

impl<T: ImageDataType> std::fmt::Display for WriteToOutputStage<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "write channels {:?} (alpha {:?}) as {:?}",
            self.color_channels,
            self.alpha_channel,
            T::DATA_TYPE_ID
        )
    }
}

impl<T: ImageDataType> RenderPipelineStage for WriteToOutputStage<T> {
    fn channel_mode(&self, c: usize) -> RenderPipelineChannelMode {
        if self.color_channels.contains(&c) || self.alpha_channel == Some(c) {
            RenderPipelineChannelMode::Input
        } else {
            RenderPipelineChannelMode::Ignored
        }
    }

    fn set_input_sizes(&mut self, sizes: &[(usize, usize)]) -> Result<()> {
        for c in self.color_channels.iter().chain(self.alpha_channel.iter()) {
            if *c >= sizes.len() {
                return Err(Error::InvalidChannel(*c, sizes.len()));
            }
        }
        debug!(
            input_size = ?sizes[self.color_channels.first().copied().unwrap_or(0)],
            output_size = ?self.output_size,
            "configured output"
        );
        Ok(())
    }

    fn init_local_state(&self) -> Result<Option<Box<dyn Any + Send>>> {
        let mut scratch: Vec<T> = vec![];
        scratch.try_reserve(self.output_size.0 * self.num_output_channels())?;
        Ok(Some(Box::new(scratch)))
    }

    fn process_row(
        &self,
        input_rows: &InputRows<'_>,
        _output_rows: &mut OutputRows<'_>,
        xextra: usize,
        xsize: usize,
        xpos: usize,
        ypos: usize,
        state: Option<&mut (dyn Any + Send)>,
    ) {
        let (width, height) = self.output_size;
        if ypos >= height || xpos >= width {
            return;
        }
        let len = xsize.min(width - xpos);
        let y = if self.flip_y { height - 1 - ypos } else { ypos };
        let x = if self.flip_x { width - xpos - len } else { xpos };

        let mut local = vec![];
        let scratch = match state.and_then(|s| s.downcast_mut::<Vec<T>>()) {
            Some(scratch) => scratch,
            None => &mut local,
        };
        let nc = self.num_output_channels();
        scratch.clear();
        scratch.resize(len * nc, T::default());

        let alpha = self.alpha_channel.map(|a| &input_rows[a][0][xextra..xextra + len]);
        for i in 0..len {
            let multiplier = match alpha {
                Some(alpha) if self.unpremultiply_alpha => 1.0 / alpha[i].max(SMALL_ALPHA),
                _ => 1.0,
            };
            let dst = if self.flip_x { len - 1 - i } else { i };
            let pixel = &mut scratch[dst * nc..(dst + 1) * nc];
            for (sample, c) in pixel.iter_mut().zip(self.color_channels.iter()) {
                *sample = T::from_normalized_f32(input_rows[*c][0][xextra + i] * multiplier);
            }
            if let Some(alpha) = alpha {
                pixel[nc - 1] = T::from_normalized_f32(alpha[i]);
            }
        }

        match &self.target {
            OutputTarget::Buffer(buffer) => buffer
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .write(x, y, scratch),
            OutputTarget::Callback(callback) => callback(x, y, scratch),
        }
    }
}
