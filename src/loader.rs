//! Format decoder seam
//!
//! The individual format decoders (MOD-family, S3M, XM, IT, ...) live
//! outside this crate; each one recognises its own byte layout and drives
//! the track encoder and module assembly to build a [`UniMod`]. This
//! module defines the contract they implement and the first-match
//! dispatch used at load time.

use crate::module::UniMod;
use crate::{Result, UniModError};

/// One module file format.
///
/// `check` must be cheap and side-effect free: loaders are probed in
/// registration order against the same byte slice. `convert` performs the
/// full parse; a failed conversion leaves no partial state behind, because
/// the [`UniMod`] under construction is discarded with the error.
pub trait ModuleFormat {
    /// Short format name for diagnostics ("XM", "S3M", ...).
    fn name(&self) -> &'static str;

    /// Whether `data` looks like this format.
    fn check(&self, data: &[u8]) -> bool;

    /// Parse `data` into an assembled module.
    fn convert(&self, data: &[u8]) -> Result<UniMod>;
}

/// Probe `formats` in order and convert with the first one that matches.
pub fn load_module(data: &[u8], formats: &[Box<dyn ModuleFormat>]) -> Result<UniMod> {
    for format in formats {
        if format.check(data) {
            return format.convert(data);
        }
    }
    Err(UniModError::MalformedModule(
        "no registered format recognises this file".into(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::ModuleSpec;

    /// Synthetic two-byte-magic format used to exercise the dispatch.
    struct TestFormat;

    impl ModuleFormat for TestFormat {
        fn name(&self) -> &'static str {
            "TEST"
        }

        fn check(&self, data: &[u8]) -> bool {
            data.starts_with(b"T!")
        }

        fn convert(&self, _data: &[u8]) -> Result<UniMod> {
            UniMod::allocate(&ModuleSpec::default())
        }
    }

    #[test]
    fn test_dispatch_finds_matching_format() {
        let formats: Vec<Box<dyn ModuleFormat>> = vec![Box::new(TestFormat)];
        let module = load_module(b"T!rest", &formats).unwrap();
        assert_eq!(module.channels, 4);
    }

    #[test]
    fn test_unrecognised_data_is_an_error() {
        let formats: Vec<Box<dyn ModuleFormat>> = vec![Box::new(TestFormat)];
        assert!(load_module(b"??", &formats).is_err());
    }
}
