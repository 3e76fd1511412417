//! Shared error plumbing for the workspace.
//!
//! - [`Location`] is captured implicitly by every `snafu` error variant.
//! - [`GenericError`] is the whatever-style error used by binaries.
//! - [`Report`] renders an error and its source chain for the terminal.
//!
//! With the `unstable-provider-api` feature (nightly), errors also provide
//! their [`Location`] through `core::error::Request`, and [`Report`] prints
//! where every error in the chain was created.

#![cfg_attr(
    feature = "unstable-provider-api",
    feature(error_generic_member_access)
)]
#![no_std]

extern crate alloc;

use alloc::{boxed::Box, string::String};
#[cfg(feature = "unstable-provider-api")]
use core::error;
use core::{error::Error, fmt};

use ansi_term::{Color, Palette};
use snafu::{GenerateImplicitData, Snafu};

/// Source location where an error value was constructed.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Location(&'static core::panic::Location<'static>);

impl Default for Location {
    #[track_caller]
    fn default() -> Self {
        Self(core::panic::Location::caller())
    }
}

impl GenerateImplicitData for Location {
    #[track_caller]
    fn generate() -> Self {
        Self::default()
    }
}

impl fmt::Debug for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Snafu)]
#[snafu(whatever, display("{message}"))]
#[cfg_attr(
    feature = "unstable-provider-api",
    snafu(provide(ref, priority, Location => location))
)]
#[cfg_attr(
    feature = "unstable-provider-api",
    snafu(provide(opt, ref, chain, dyn core::error::Error => source.as_deref()))
)]
pub struct GenericError {
    message: String,
    #[snafu(implicit)]
    location: Location,
    #[snafu(source(from(Box<dyn core::error::Error>, Some)))]
    #[cfg_attr(feature = "unstable-provider-api", snafu(provide(false)))]
    source: Option<Box<dyn core::error::Error>>,
}

impl GenericError {
    #[must_use]
    pub fn location(&self) -> Location {
        self.location
    }
}

/// Terminal rendering of an error and its chain of sources.
pub struct Report<E> {
    error: E,
    palette: Palette,
}

impl<E> fmt::Debug for Report<E>
where
    E: Error,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl<E> fmt::Display for Report<E>
where
    E: Error,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let palette = self.palette;
        writeln!(f, "Error: {}", palette.paint(Color::Red, &self.error))?;
        #[cfg(feature = "unstable-provider-api")]
        if let Some(loc) = error::request_ref::<Location>(&self.error) {
            writeln!(f, "  at {}", palette.paint(Color::DarkGray, loc))?;
        }
        let mut source = self.error.source();
        if source.is_some() {
            writeln!(f)?;
            writeln!(f, "Caused by:")?;
        }
        let mut index = 0;
        while let Some(s) = source {
            writeln!(f, "{index:4}: {}", palette.paint(Color::Red, s))?;
            #[cfg(feature = "unstable-provider-api")]
            if let Some(loc) = error::request_ref::<Location>(s) {
                writeln!(f, "      at {}", palette.paint(Color::DarkGray, loc))?;
            }
            source = s.source();
            index += 1;
        }
        Ok(())
    }
}

impl<E> Report<E> {
    pub fn new(error: E) -> Self {
        Self {
            error,
            palette: Palette::default(),
        }
    }

    #[must_use]
    pub fn with_palette(self, palette: Palette) -> Self {
        Self { palette, ..self }
    }
}
