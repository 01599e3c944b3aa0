use image::RgbaImage;
use image::imageops::{self, FilterType};

use crate::engine::PictureScaler;
use crate::error::{Result, TranscodeError};
use crate::media::{Interpolation, Picture, PixelFormat, VideoParameters};

pub(super) struct NativeScaler {
    input: VideoParameters,
    output: VideoParameters,
    filter: FilterType,
}

impl NativeScaler {
    pub(super) fn new(
        input: &VideoParameters,
        output: &VideoParameters,
        interpolation: Interpolation,
    ) -> Result<Self> {
        if input.width == 0 || input.height == 0 || output.width == 0 || output.height == 0 {
            return Err(TranscodeError::unsupported_conversion(format!(
                "cannot scale {}x{} to {}x{}",
                input.width, input.height, output.width, output.height
            )));
        }
        Ok(Self {
            input: input.clone(),
            output: output.clone(),
            filter: map_filter(interpolation),
        })
    }
}

pub(super) fn map_filter(interpolation: Interpolation) -> FilterType {
    match interpolation {
        Interpolation::Point => FilterType::Nearest,
        Interpolation::FastBilinear | Interpolation::Bilinear | Interpolation::Area => {
            FilterType::Triangle
        }
        Interpolation::Bicubic
        | Interpolation::Bicublin
        | Interpolation::Spline
        | Interpolation::Experimental => FilterType::CatmullRom,
        Interpolation::Gauss => FilterType::Gaussian,
        Interpolation::Sinc | Interpolation::Lanczos => FilterType::Lanczos3,
    }
}

fn clamp_u8(v: i32) -> u8 {
    v.clamp(0, 255) as u8
}

fn row<'a>(picture: &'a Picture, plane: usize, y: usize, len: usize) -> &'a [u8] {
    let p = &picture.planes[plane];
    &p.data[y * p.linesize..y * p.linesize + len]
}

fn to_rgba(picture: &Picture) -> RgbaImage {
    let (w, h) = (picture.width as usize, picture.height as usize);
    let mut rgba = RgbaImage::new(picture.width, picture.height);
    for y in 0..h {
        for x in 0..w {
            let px = match picture.format {
                PixelFormat::Rgb24 => {
                    let r = row(picture, 0, y, w * 3);
                    [r[x * 3], r[x * 3 + 1], r[x * 3 + 2], 255]
                }
                PixelFormat::Rgba => {
                    let r = row(picture, 0, y, w * 4);
                    [r[x * 4], r[x * 4 + 1], r[x * 4 + 2], r[x * 4 + 3]]
                }
                PixelFormat::Gray8 => {
                    let l = row(picture, 0, y, w)[x];
                    [l, l, l, 255]
                }
                PixelFormat::Yuv420p => {
                    let cw = w.div_ceil(2);
                    let c = row(picture, 0, y, w)[x] as i32 - 16;
                    let d = row(picture, 1, y / 2, cw)[x / 2] as i32 - 128;
                    let e = row(picture, 2, y / 2, cw)[x / 2] as i32 - 128;
                    [
                        clamp_u8((298 * c + 409 * e + 128) >> 8),
                        clamp_u8((298 * c - 100 * d - 208 * e + 128) >> 8),
                        clamp_u8((298 * c + 516 * d + 128) >> 8),
                        255,
                    ]
                }
            };
            rgba.put_pixel(x as u32, y as u32, image::Rgba(px));
        }
    }
    rgba
}

fn from_rgba(rgba: &RgbaImage, out: &mut Picture) {
    let (w, h) = (out.width as usize, out.height as usize);
    match out.format {
        PixelFormat::Rgb24 | PixelFormat::Rgba | PixelFormat::Gray8 => {
            let bpp = match out.format {
                PixelFormat::Rgb24 => 3,
                PixelFormat::Rgba => 4,
                _ => 1,
            };
            let plane = &mut out.planes[0];
            for (x, y, px) in rgba.enumerate_pixels() {
                let at = y as usize * plane.linesize + x as usize * bpp;
                let [r, g, b, a] = px.0;
                match bpp {
                    3 => plane.data[at..at + 3].copy_from_slice(&[r, g, b]),
                    4 => plane.data[at..at + 4].copy_from_slice(&[r, g, b, a]),
                    _ => {
                        plane.data[at] =
                            ((77 * r as u32 + 150 * g as u32 + 29 * b as u32 + 128) >> 8) as u8
                    }
                }
            }
        }
        PixelFormat::Yuv420p => {
            for y in 0..h {
                let line = out.planes[0].linesize;
                for x in 0..w {
                    let [r, g, b, _] = rgba.get_pixel(x as u32, y as u32).0;
                    let (r, g, b) = (r as i32, g as i32, b as i32);
                    out.planes[0].data[y * line + x] =
                        clamp_u8(((66 * r + 129 * g + 25 * b + 128) >> 8) + 16);
                }
            }
            for cy in 0..h.div_ceil(2) {
                for cx in 0..w.div_ceil(2) {
                    let (mut r, mut g, mut b, mut n) = (0i32, 0i32, 0i32, 0i32);
                    for y in cy * 2..(cy * 2 + 2).min(h) {
                        for x in cx * 2..(cx * 2 + 2).min(w) {
                            let px = rgba.get_pixel(x as u32, y as u32).0;
                            r += px[0] as i32;
                            g += px[1] as i32;
                            b += px[2] as i32;
                            n += 1;
                        }
                    }
                    let (r, g, b) = (r / n, g / n, b / n);
                    let u = clamp_u8(((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128);
                    let v = clamp_u8(((112 * r - 94 * g - 18 * b + 128) >> 8) + 128);
                    let (lu, lv) = (out.planes[1].linesize, out.planes[2].linesize);
                    out.planes[1].data[cy * lu + cx] = u;
                    out.planes[2].data[cy * lv + cx] = v;
                }
            }
        }
    }
}

fn copy_planes(input: &Picture, output: &mut Picture) {
    let layout = input.format.plane_layout(input.width, input.height);
    for ((src, dst), (bytes, rows)) in input.planes.iter().zip(&mut output.planes).zip(layout) {
        for y in 0..rows {
            let s = y * src.linesize;
            let d = y * dst.linesize;
            dst.data[d..d + bytes].copy_from_slice(&src.data[s..s + bytes]);
        }
    }
}

impl PictureScaler for NativeScaler {
    fn scale(&mut self, input: &Picture, output: &mut Picture) -> Result<()> {
        if input.width != self.input.width
            || input.height != self.input.height
            || input.format != self.input.pixel_format
        {
            return Err(TranscodeError::unsupported_conversion(format!(
                "scaler configured for {}x{} {} received {}x{} {}",
                self.input.width,
                self.input.height,
                self.input.pixel_format,
                input.width,
                input.height,
                input.format
            )));
        }
        if output.width != self.output.width
            || output.height != self.output.height
            || output.format != self.output.pixel_format
        {
            return Err(TranscodeError::invalid_state(
                "destination picture does not match the scaler output",
            ));
        }
        let same_size = input.width == output.width && input.height == output.height;
        if same_size && input.format == output.format {
            copy_planes(input, output);
            return Ok(());
        }
        let mut rgba = to_rgba(input);
        if !same_size {
            rgba = imageops::resize(&rgba, output.width, output.height, self.filter);
        }
        from_rgba(&rgba, output);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(format: PixelFormat, width: u32, height: u32) -> VideoParameters {
        VideoParameters {
            width,
            height,
            pixel_format: format,
            frame_rate: crate::time::Rational::from_int(30),
        }
    }

    #[test]
    fn filter_mapping() {
        assert_eq!(map_filter(Interpolation::default()), FilterType::CatmullRom);
        assert_eq!(map_filter(Interpolation::Point), FilterType::Nearest);
        assert_eq!(map_filter(Interpolation::Lanczos), FilterType::Lanczos3);
    }

    #[test]
    fn downscale_solid_rgb_keeps_colour() {
        let mut scaler = NativeScaler::new(
            &params(PixelFormat::Rgb24, 8, 8),
            &params(PixelFormat::Rgb24, 4, 2),
            Interpolation::Bilinear,
        )
        .unwrap();
        let mut input = Picture::alloc(PixelFormat::Rgb24, 8, 8).unwrap();
        for px in input.planes[0].data.chunks_exact_mut(3) {
            px.copy_from_slice(&[200, 40, 10]);
        }
        let mut output = Picture::alloc(PixelFormat::Rgb24, 4, 2).unwrap();
        scaler.scale(&input, &mut output).unwrap();
        for px in output.planes[0].data.chunks_exact(3) {
            for (got, want) in px.iter().zip([200u8, 40, 10]) {
                assert!(got.abs_diff(want) <= 1, "{px:?}");
            }
        }
    }

    #[test]
    fn rgb_to_yuv_grey_is_neutral() {
        let mut scaler = NativeScaler::new(
            &params(PixelFormat::Rgb24, 4, 4),
            &params(PixelFormat::Yuv420p, 4, 4),
            Interpolation::Bicubic,
        )
        .unwrap();
        let mut input = Picture::alloc(PixelFormat::Rgb24, 4, 4).unwrap();
        input.planes[0].data.fill(128);
        let mut output = Picture::alloc(PixelFormat::Yuv420p, 4, 4).unwrap();
        scaler.scale(&input, &mut output).unwrap();
        assert!(output.planes[1].data.iter().all(|u| *u == 128));
        assert!(output.planes[2].data.iter().all(|v| *v == 128));
        assert!(output.planes[0].data.iter().all(|y| (125..=127).contains(y)));
    }

    #[test]
    fn wrong_input_geometry_is_rejected() {
        let mut scaler = NativeScaler::new(
            &params(PixelFormat::Gray8, 4, 4),
            &params(PixelFormat::Gray8, 2, 2),
            Interpolation::Point,
        )
        .unwrap();
        let input = Picture::alloc(PixelFormat::Gray8, 3, 3).unwrap();
        let mut output = Picture::alloc(PixelFormat::Gray8, 2, 2).unwrap();
        assert!(scaler.scale(&input, &mut output).is_err());
    }
}
