//! Identity type for pipeline components.
//!
//! Ids are handed out in registration order and never reused within one
//! pipeline, so they stay stable while other components are removed.

use std::fmt;

/// Identifier of a registered Input, Converter or Output.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ComponentId(pub u32);

impl ComponentId {
    pub const INVALID: ComponentId = ComponentId(u32::MAX);

    #[inline]
    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }

    /// Return the current id and advance the counter.
    #[inline]
    pub(crate) fn next(counter: &mut u32) -> Self {
        let id = ComponentId(*counter);
        *counter += 1;
        id
    }
}

impl fmt::Debug for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::INVALID {
            write!(f, "ComponentId(INVALID)")
        } else {
            write!(f, "ComponentId({})", self.0)
        }
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequential_ids() {
        let mut counter = 0;
        assert_eq!(ComponentId::next(&mut counter), ComponentId(0));
        assert_eq!(ComponentId::next(&mut counter), ComponentId(1));
        assert_eq!(counter, 2);
    }

    #[test]
    fn test_invalid() {
        assert!(!ComponentId::INVALID.is_valid());
        assert!(ComponentId(3).is_valid());
        assert_eq!(format!("{:?}", ComponentId::INVALID), "ComponentId(INVALID)");
        assert_eq!(ComponentId(3).to_string(), "#3");
    }
}
