// SPDX-License-Identifier: GPL-3.0-or-later
use std::convert::TryFrom;
use std::error::Error as StdError;
use std::fmt;
use std::str::FromStr;

use colorous::Gradient;
use serde::de::{self, Deserialize, Deserializer, Visitor};
use serde::{Serialize, Serializer};

/// The false-color palettes frames can be rendered with.
///
/// The discriminant is the palette's stable index, as used by [`Palette::try_from`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) enum Palette {
    Turbo = 0,
    Viridis = 1,
    Inferno = 2,
    Magma = 3,
    Plasma = 4,
    Cividis = 5,
    Rainbow = 6,
    Sinebow = 7,
    Cool = 8,
    Warm = 9,
    Cubehelix = 10,
    Greys = 11,
    Spectral = 12,
    RedYellowBlue = 13,
}

/// A palette sampled at 256 evenly spaced points.
pub(crate) type LookupTable = [[u8; 3]; 256];

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum PaletteError {
    InvalidIndex(usize),
    InvalidName(String),
}

impl fmt::Display for PaletteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaletteError::InvalidIndex(index) => write!(
                f,
                "no palette with index {} (valid indices are 0 through {})",
                index,
                Palette::ALL.len() - 1
            ),
            PaletteError::InvalidName(name) => write!(f, "no palette named '{}'", name),
        }
    }
}

impl StdError for PaletteError {}

impl Palette {
    pub(crate) const ALL: [Palette; 14] = [
        Palette::Turbo,
        Palette::Viridis,
        Palette::Inferno,
        Palette::Magma,
        Palette::Plasma,
        Palette::Cividis,
        Palette::Rainbow,
        Palette::Sinebow,
        Palette::Cool,
        Palette::Warm,
        Palette::Cubehelix,
        Palette::Greys,
        Palette::Spectral,
        Palette::RedYellowBlue,
    ];

    pub(crate) fn index(self) -> usize {
        self as usize
    }

    pub(crate) fn name(self) -> &'static str {
        match self {
            Palette::Turbo => "turbo",
            Palette::Viridis => "viridis",
            Palette::Inferno => "inferno",
            Palette::Magma => "magma",
            Palette::Plasma => "plasma",
            Palette::Cividis => "cividis",
            Palette::Rainbow => "rainbow",
            Palette::Sinebow => "sinebow",
            Palette::Cool => "cool",
            Palette::Warm => "warm",
            Palette::Cubehelix => "cubehelix",
            Palette::Greys => "greys",
            Palette::Spectral => "spectral",
            Palette::RedYellowBlue => "red_yellow_blue",
        }
    }

    fn gradient(self) -> Gradient {
        match self {
            Palette::Turbo => colorous::TURBO,
            Palette::Viridis => colorous::VIRIDIS,
            Palette::Inferno => colorous::INFERNO,
            Palette::Magma => colorous::MAGMA,
            Palette::Plasma => colorous::PLASMA,
            Palette::Cividis => colorous::CIVIDIS,
            Palette::Rainbow => colorous::RAINBOW,
            Palette::Sinebow => colorous::SINEBOW,
            Palette::Cool => colorous::COOL,
            Palette::Warm => colorous::WARM,
            Palette::Cubehelix => colorous::CUBEHELIX,
            Palette::Greys => colorous::GREYS,
            Palette::Spectral => colorous::SPECTRAL,
            Palette::RedYellowBlue => colorous::RED_YELLOW_BLUE,
        }
    }

    /// Sample the palette into a lookup table, low values first.
    pub(crate) fn lookup_table(self) -> LookupTable {
        let gradient = self.gradient();
        let mut table = [[0u8; 3]; 256];
        for (index, entry) in table.iter_mut().enumerate() {
            *entry = gradient.eval_rational(index, 256).as_array();
        }
        table
    }
}

impl Default for Palette {
    fn default() -> Self {
        Self::Turbo
    }
}

impl fmt::Display for Palette {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl TryFrom<usize> for Palette {
    type Error = PaletteError;

    fn try_from(index: usize) -> Result<Self, Self::Error> {
        Self::ALL
            .get(index)
            .copied()
            .ok_or(PaletteError::InvalidIndex(index))
    }
}

impl FromStr for Palette {
    type Err = PaletteError;

    /// Parse a palette name, ignoring case and treating spaces, dashes and underscores alike.
    ///
    /// A bare number is accepted as a palette index.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(index) = s.trim().parse::<usize>() {
            return Self::try_from(index);
        }
        let normalized = s.trim().to_lowercase().replace(|c: char| c == ' ' || c == '-', "_");
        Self::ALL
            .iter()
            .copied()
            .find(|palette| palette.name() == normalized)
            .ok_or_else(|| PaletteError::InvalidName(s.to_string()))
    }
}

impl Serialize for Palette {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.name())
    }
}

struct PaletteVisitor;

impl<'de> Visitor<'de> for PaletteVisitor {
    type Value = Palette;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a palette name or index")
    }

    fn visit_u64<E: de::Error>(self, value: u64) -> Result<Palette, E> {
        Palette::try_from(value as usize).map_err(|_| {
            de::Error::invalid_value(de::Unexpected::Unsigned(value), &"a valid palette index")
        })
    }

    fn visit_i64<E: de::Error>(self, value: i64) -> Result<Palette, E> {
        if value < 0 {
            Err(de::Error::invalid_value(
                de::Unexpected::Signed(value),
                &"a valid palette index",
            ))
        } else {
            self.visit_u64(value as u64)
        }
    }

    fn visit_str<E: de::Error>(self, value: &str) -> Result<Palette, E> {
        value.parse().map_err(|_| {
            de::Error::invalid_value(de::Unexpected::Str(value), &"the name of a palette")
        })
    }
}

impl<'de> Deserialize<'de> for Palette {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(PaletteVisitor)
    }
}

#[cfg(test)]
mod test {
    use std::collections::HashSet;
    use std::convert::TryFrom;

    use serde::Deserialize;

    use super::{Palette, PaletteError};

    #[derive(Debug, Deserialize)]
    struct Wrapper {
        palette: Palette,
    }

    fn parse_toml(value: &str) -> Result<Palette, toml::de::Error> {
        toml::from_str::<Wrapper>(&format!("palette = {}", value)).map(|w| w.palette)
    }

    #[test]
    fn at_least_ten_palettes() {
        assert!(Palette::ALL.len() >= 10);
        let names: HashSet<_> = Palette::ALL.iter().map(|p| p.name()).collect();
        assert_eq!(names.len(), Palette::ALL.len());
    }

    #[test]
    fn indices_round_trip() {
        for (index, palette) in Palette::ALL.iter().enumerate() {
            assert_eq!(palette.index(), index);
            assert_eq!(Palette::try_from(index), Ok(*palette));
        }
    }

    #[test]
    fn invalid_index_rejected() {
        assert_eq!(
            Palette::try_from(Palette::ALL.len()),
            Err(PaletteError::InvalidIndex(Palette::ALL.len()))
        );
        assert!(Palette::try_from(usize::MAX).is_err());
    }

    #[test]
    fn names_ignore_case_and_separators() {
        assert_eq!("TURBO".parse(), Ok(Palette::Turbo));
        assert_eq!("vIrIdIs".parse(), Ok(Palette::Viridis));
        assert_eq!("red yellow blue".parse(), Ok(Palette::RedYellowBlue));
        assert_eq!("Red-Yellow_Blue".parse(), Ok(Palette::RedYellowBlue));
    }

    #[test]
    fn numeric_string_is_index() {
        assert_eq!("2".parse(), Ok(Palette::Inferno));
        assert!("99".parse::<Palette>().is_err());
    }

    #[test]
    fn bad_name() {
        assert_eq!(
            "jet".parse::<Palette>(),
            Err(PaletteError::InvalidName("jet".to_string()))
        );
    }

    #[test]
    fn deserialize_name_and_index() {
        assert_eq!(parse_toml("\"magma\"").unwrap(), Palette::Magma);
        assert_eq!(parse_toml("4").unwrap(), Palette::Plasma);
        assert!(parse_toml("42").is_err());
        assert!(parse_toml("-1").is_err());
        assert!(parse_toml("\"not a palette\"").is_err());
    }

    #[test]
    fn lookup_table_endpoints() {
        let greys = Palette::Greys.lookup_table();
        // colorous' greys runs from white to black
        assert!(greys[0].iter().all(|c| *c > 240));
        assert!(greys[255].iter().all(|c| *c < 16));
        assert_ne!(
            Palette::Turbo.lookup_table()[0],
            Palette::Viridis.lookup_table()[0]
        );
    }
}
