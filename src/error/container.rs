use std::fmt::Formatter;

use thiserror::Error;

use crate::disassembly::Location;

/// An error that may be localised to a particular instruction in the code
/// cells of the contract.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub struct Located<E>
where
    E: Clone,
{
    /// The instruction location at which the error occurred, if one is known.
    pub location: Option<Location>,

    /// The error data
    pub payload: E,
}

impl<E> Located<E>
where
    E: Clone,
{
    /// Wraps `payload` without attaching any location to it.
    #[must_use]
    pub fn unlocated(payload: E) -> Self {
        Self {
            location: None,
            payload,
        }
    }
}

/// Displays the error associated with the code cell and bit offset where the
/// error occurred.
impl<E> std::fmt::Display for Located<E>
where
    E: std::fmt::Display + Clone,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.location {
            Some(location) => write!(f, "[{location}]: {}", self.payload),
            None => write!(f, "[unknown]: {}", self.payload),
        }
    }
}

/// A trait for types that can have an instruction location attached to them.
pub trait Locatable
where
    Self: Sized,
{
    /// The return type with the attached location.
    type Located;

    /// Attach the provided instruction `location` to the error.
    fn locate(self, location: Option<Location>) -> Self::Located;
}

/// A blanket implementation that allows for attaching a location to any result.
impl<T, E> Locatable for Result<T, E>
where
    E: std::error::Error + Clone,
{
    type Located = Result<T, Located<E>>;

    fn locate(self, location: Option<Location>) -> Self::Located {
        self.map_err(|payload| Located { location, payload })
    }
}

/// An error that is a collection of errors.
///
/// The order of the errors in the container is dependent on the contained type
/// `E`, but defaults to the order in which the errors were added to the
/// container.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub struct Errors<E> {
    payloads: Vec<E>,
}

impl<E> Errors<E> {
    /// Creates a new container for errors.
    #[must_use]
    pub fn new() -> Self {
        let payloads = vec![];
        Self { payloads }
    }

    /// Gets the errors contained within this error.
    #[must_use]
    pub fn payloads(&self) -> &[E] {
        self.payloads.as_slice()
    }

    /// Gets the length of the errors container.
    #[must_use]
    pub fn len(&self) -> usize {
        self.payloads.len()
    }

    /// Checks if the errors container is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<E> Errors<E>
where
    E: std::error::Error,
{
    /// Adds the provided `error` to the container.
    pub fn add(&mut self, error: E) {
        self.payloads.push(error);
    }

    /// Adds the multiple provided errors to the container.
    pub fn add_many(&mut self, errors: impl Into<Vec<E>>) {
        self.payloads.extend(errors.into());
    }
}

/// Where the locations are a known type, the container keeps the located
/// errors sorted by their position in the code. Unlocated errors come first.
impl<E> Errors<Located<E>>
where
    E: std::error::Error + Clone,
{
    /// Adds an error `payload` at the specific instruction `location`.
    pub fn add_located(&mut self, location: Option<Location>, payload: E) {
        let error = Located { location, payload };
        self.payloads.push(error);
        self.sort();
    }

    /// Adds many errors to the container at once.
    pub fn add_many_located(&mut self, errors: impl Into<Vec<Located<E>>>) {
        self.payloads.extend(errors.into());
        self.sort();
    }

    fn sort(&mut self) {
        self.payloads.sort_by(|l, r| l.location.cmp(&r.location));
    }
}

/// The default errors container is one containing no errors.
impl<E> Default for Errors<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Allow conversion from any error type to a container of errors.
impl<E> From<E> for Errors<E>
where
    E: std::error::Error,
{
    fn from(value: E) -> Self {
        let mut errors = Self::default();
        errors.add(value);
        errors
    }
}

/// Allow conversion from the errors container to a vector of errors.
impl<E> From<Errors<E>> for Vec<E>
where
    E: std::error::Error,
{
    fn from(value: Errors<E>) -> Self {
        value.payloads
    }
}

/// Allow conversion from a vector of errors to the errors container.
impl<E> From<Vec<E>> for Errors<E>
where
    E: std::error::Error,
{
    fn from(value: Vec<E>) -> Self {
        Self { payloads: value }
    }
}

/// Displays the errors in the sequence in which they occur in the container.
///
/// It has a header specifying how many errors occurred, and then prints one
/// error per line after that.
impl<E> std::fmt::Display for Errors<E>
where
    E: std::fmt::Display,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.payloads.is_empty() {
            write!(f, "Encountered no errors")?;
        } else {
            writeln!(f, "Encountered {} errors:", self.payloads.len())?;
            for error in &self.payloads {
                writeln!(f, "{error}")?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use crate::{
        cell::CellHash,
        disassembly::Location,
        error::{
            container::{Errors, Located},
            execution::Error,
        },
    };

    #[test]
    fn keeps_located_errors_sorted_by_location() {
        let cell = CellHash::from_bytes([7; 32]);
        let mut errors: Errors<Located<Error>> = Errors::new();
        errors.add_located(Some(Location::new(cell, 24)), Error::InvalidStep);
        errors.add_located(Some(Location::new(cell, 8)), Error::NoSuchState);
        errors.add_located(None, Error::InvalidStep);

        let offsets: Vec<Option<u16>> = errors
            .payloads()
            .iter()
            .map(|e| e.location.map(|l| l.offset))
            .collect();
        assert_eq!(offsets, vec![None, Some(8), Some(24)]);
    }

    #[test]
    fn displays_a_count_header() {
        let errors: Errors<Located<Error>> = vec![Located::unlocated(Error::InvalidStep)].into();
        assert!(errors.to_string().starts_with("Encountered 1 errors:"));
    }
}
