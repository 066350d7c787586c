// THEORY (1D Pixel Heuristics):
// The `Pixel` module is the smallest unit of the perception engine. It is a
// "dumb" data container for a single RGB sample plus the handful of
// single-pixel heuristics the tile classifier needs: chroma and a
// hue/saturation/value triple expressed on the 8-bit scale the game's
// colour thresholds were tuned against (H in 0..180, S and V in 0..255).
//
// Key principles:
// 1) Single-pixel scope: nothing here reads neighbours or history.
// 2) The heavier lifting (edges, contours, template scores) lives in
//    `image_ops` and `template` and runs on whole frames.

pub mod pixel {
    use image::Rgb;

    pub type Channel = u8;
    pub type Hue = u8;
    pub type Saturation = u8;
    pub type Value = u8;

    /// A "dumb" data container for one RGB sample.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Pixel {
        pub red: Channel,
        pub green: Channel,
        pub blue: Channel,
    }

    /// Hue/saturation/value on the 8-bit scale (H 0..180, S/V 0..255).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Hsv {
        pub hue: Hue,
        pub saturation: Saturation,
        pub value: Value,
    }

    /// Inclusive HSV box, as used for the red and yellow tile boundaries.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct HsvRange {
        pub lower: [u8; 3],
        pub upper: [u8; 3],
    }

    impl HsvRange {
        pub const fn new(lower: [u8; 3], upper: [u8; 3]) -> Self {
            Self { lower, upper }
        }

        pub fn contains(&self, hsv: Hsv) -> bool {
            let channels = [hsv.hue, hsv.saturation, hsv.value];
            channels
                .iter()
                .zip(self.lower.iter().zip(self.upper.iter()))
                .all(|(c, (lo, hi))| c >= lo && c <= hi)
        }
    }

    impl From<&Rgb<u8>> for Pixel {
        fn from(rgb: &Rgb<u8>) -> Self {
            Pixel::new(rgb[0], rgb[1], rgb[2])
        }
    }

    impl Pixel {
        pub fn new(red: Channel, green: Channel, blue: Channel) -> Self {
            Self { red, green, blue }
        }

        fn max_channel(&self) -> Channel {
            self.red.max(self.green.max(self.blue))
        }

        fn min_channel(&self) -> Channel {
            self.red.min(self.green.min(self.blue))
        }

        /// Chroma (C): max(R,G,B) - min(R,G,B).
        pub fn chroma(&self) -> Channel {
            self.max_channel() - self.min_channel()
        }

        /// Hue angle in degrees [0, 360).
        pub fn hue_degrees(&self) -> f32 {
            let chroma = self.chroma() as f32;
            if chroma <= 0.0 {
                return 0.0;
            }
            let (r, g, b) = (self.red as f32, self.green as f32, self.blue as f32);
            let max = self.max_channel();

            let (base_difference, sector_offset) = if max == self.red {
                (g - b, 0.0)
            } else if max == self.green {
                (b - r, 2.0)
            } else {
                (r - g, 4.0)
            };

            let mut hue_degrees = (base_difference / chroma + sector_offset) * 60.0;
            if hue_degrees < 0.0 {
                hue_degrees += 360.0;
            }
            hue_degrees
        }

        /// HSV triple on the 8-bit scale. Hue is halved so it fits a byte.
        pub fn hsv(&self) -> Hsv {
            let value = self.max_channel();
            let saturation = if value == 0 {
                0
            } else {
                ((self.chroma() as f32 * 255.0) / value as f32).round() as u8
            };
            let hue = ((self.hue_degrees() / 2.0).round() as u16 % 180) as u8;
            Hsv { hue, saturation, value }
        }
    }
}
