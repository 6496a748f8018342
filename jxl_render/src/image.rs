// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

use std::fmt::Debug;

use crate::{
    error::{Error, Result},
    util::tracing_wrappers::*,
};

mod rect;

pub use rect::Rect;

mod private {
    pub trait Sealed {}
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum DataTypeTag {
    U8,
    U16,
    F32,
}

pub trait ImageDataType:
    private::Sealed + Copy + Default + Send + Sync + 'static + Debug + PartialEq
{
    /// ID of this data type. Different types *must* have different values.
    const DATA_TYPE_ID: DataTypeTag;

    /// Converts a sample in the nominal [0, 1] range to this type, saturating.
    fn from_normalized_f32(v: f32) -> Self;
    #[cfg(test)]
    fn random<R: rand::Rng>(rng: &mut R) -> Self;
}

macro_rules! impl_integer_image_data_type {
    ($ty: ty, $id: ident) => {
        impl private::Sealed for $ty {}
        impl ImageDataType for $ty {
            const DATA_TYPE_ID: DataTypeTag = DataTypeTag::$id;
            fn from_normalized_f32(v: f32) -> $ty {
                let max = <$ty>::MAX as f32;
                num_traits::clamp(v * max, 0.0, max).round() as $ty
            }
            #[cfg(test)]
            fn random<R: rand::Rng>(rng: &mut R) -> Self {
                rng.random()
            }
        }
    };
}

impl_integer_image_data_type!(u8, U8);
impl_integer_image_data_type!(u16, U16);

impl private::Sealed for f32 {}
impl ImageDataType for f32 {
    const DATA_TYPE_ID: DataTypeTag = DataTypeTag::F32;
    fn from_normalized_f32(v: f32) -> f32 {
        v
    }
    #[cfg(test)]
    fn random<R: rand::Rng>(rng: &mut R) -> Self {
        rng.random_range(-1.0..1.0)
    }
}

pub struct Image<T: ImageDataType> {
    size: (usize, usize),
    data: Vec<T>,
}

impl<T: ImageDataType> Debug for Image<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?} {}x{}", T::DATA_TYPE_ID, self.size.0, self.size.1)
    }
}

#[derive(Clone, Copy)]
pub struct ImageRect<'a, T: ImageDataType> {
    rect: Rect,
    image: &'a Image<T>,
}

pub struct ImageRectMut<'a, T: ImageDataType> {
    rect: Rect,
    image: &'a mut Image<T>,
}

impl<T: ImageDataType> Debug for ImageRect<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?} {:?}", T::DATA_TYPE_ID, self.rect)
    }
}

impl<T: ImageDataType> Debug for ImageRectMut<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "mut {:?} {:?}", T::DATA_TYPE_ID, self.rect)
    }
}

impl<T: ImageDataType> Image<T> {
    /// Allocates a zero-initialized image. Empty images are allowed and own no memory.
    pub fn new(size: (usize, usize)) -> Result<Image<T>> {
        Self::new_with_value(size, T::default())
    }

    pub fn new_with_value(size: (usize, usize), value: T) -> Result<Image<T>> {
        let (xsize, ysize) = size;
        // These limits let us not worry about overflows.
        if xsize as u64 >= i64::MAX as u64 / 4 || ysize as u64 >= i64::MAX as u64 / 4 {
            return Err(Error::ImageSizeTooLarge(xsize, ysize));
        }
        let total_size = xsize
            .checked_mul(ysize)
            .ok_or(Error::ImageSizeTooLarge(xsize, ysize))?;
        trace!(xsize, ysize, "allocating image");
        let mut data = vec![];
        data.try_reserve_exact(total_size)?;
        data.resize(total_size, value);
        Ok(Image {
            size: (xsize, ysize),
            data,
        })
    }

    #[cfg(test)]
    pub fn new_random<R: rand::Rng>(size: (usize, usize), rng: &mut R) -> Result<Image<T>> {
        let mut img = Self::new(size)?;
        img.data.iter_mut().for_each(|x| *x = T::random(rng));
        Ok(img)
    }

    pub fn try_clone(&self) -> Result<Image<T>> {
        let mut data = vec![];
        data.try_reserve_exact(self.data.len())?;
        data.extend_from_slice(&self.data);
        Ok(Image {
            size: self.size,
            data,
        })
    }

    pub fn size(&self) -> (usize, usize) {
        self.size
    }

    pub fn row(&self, row: usize) -> &[T] {
        debug_assert!(row < self.size.1);
        let start = row * self.size.0;
        &self.data[start..start + self.size.0]
    }

    pub fn row_mut(&mut self, row: usize) -> &mut [T] {
        debug_assert!(row < self.size.1);
        let start = row * self.size.0;
        &mut self.data[start..start + self.size.0]
    }

    pub fn fill(&mut self, value: T) {
        self.data.iter_mut().for_each(|x| *x = value);
    }

    pub fn as_rect(&self) -> ImageRect<'_, T> {
        ImageRect {
            rect: Rect::new((0, 0), self.size),
            image: self,
        }
    }

    pub fn as_rect_mut(&mut self) -> ImageRectMut<'_, T> {
        ImageRectMut {
            rect: Rect::new((0, 0), self.size),
            image: self,
        }
    }

    pub fn get_rect(&self, rect: Rect) -> Result<ImageRect<'_, T>> {
        self.as_rect().rect(rect)
    }

    pub fn get_rect_mut(&mut self, rect: Rect) -> Result<ImageRectMut<'_, T>> {
        self.as_rect_mut().into_rect(rect)
    }
}

impl<'a, T: ImageDataType> ImageRect<'a, T> {
    /// Returns a sub-rect; `rect` is relative to this rect.
    pub fn rect(self, rect: Rect) -> Result<ImageRect<'a, T>> {
        rect.is_within(self.rect.size)?;
        Ok(ImageRect {
            rect: rect.translate(self.rect.origin),
            image: self.image,
        })
    }

    pub fn size(&self) -> (usize, usize) {
        self.rect.size
    }

    pub fn row(&self, row: usize) -> &'a [T] {
        debug_assert!(row < self.rect.size.1);
        let start = (row + self.rect.origin.1) * self.image.size.0 + self.rect.origin.0;
        &self.image.data[start..start + self.rect.size.0]
    }

    pub fn iter(&self) -> impl Iterator<Item = T> + '_ {
        (0..self.rect.size.1).flat_map(|y| self.row(y).iter().cloned())
    }
}

impl<'a, T: ImageDataType> ImageRectMut<'a, T> {
    pub fn into_rect(self, rect: Rect) -> Result<ImageRectMut<'a, T>> {
        rect.is_within(self.rect.size)?;
        Ok(ImageRectMut {
            rect: rect.translate(self.rect.origin),
            image: self.image,
        })
    }

    pub fn size(&self) -> (usize, usize) {
        self.rect.size
    }

    pub fn row(&mut self, row: usize) -> &mut [T] {
        debug_assert!(row < self.rect.size.1);
        let start = (row + self.rect.origin.1) * self.image.size.0 + self.rect.origin.0;
        &mut self.image.data[start..start + self.rect.size.0]
    }

    pub fn copy_from(&mut self, other: ImageRect<'_, T>) -> Result<()> {
        if other.size() != self.size() {
            return Err(Error::CopyOfDifferentSize(
                other.size().0,
                other.size().1,
                self.rect.size.0,
                self.rect.size.1,
            ));
        }
        for y in 0..self.rect.size.1 {
            self.row(y).copy_from_slice(other.row(y));
        }
        Ok(())
    }

    pub fn fill(&mut self, value: T) {
        for y in 0..self.rect.size.1 {
            self.row(y).iter_mut().for_each(|x| *x = value);
        }
    }

}

/// Copies `rect` of `src` into `dst`, placing its top-left corner at `dst_origin`.
pub fn copy_image_rect_to<T: ImageDataType>(
    src: &Image<T>,
    rect: Rect,
    dst: &mut Image<T>,
    dst_origin: (usize, usize),
) -> Result<()> {
    let src = src.get_rect(rect)?;
    dst.get_rect_mut(Rect::new(dst_origin, rect.size))?
        .copy_from(src)
}
