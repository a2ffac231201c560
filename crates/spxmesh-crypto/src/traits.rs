//! Marker traits enforcing a zeroization policy on key material.

use zeroize::Zeroize;

/// Types containing cryptographic key material that must be wiped on drop.
///
/// Implementors should derive `ZeroizeOnDrop` (preferred) or implement
/// `Drop` calling `zeroize()` on every sensitive field.
pub trait ZeroizingKey {}

/// Combines [`ZeroizingKey`] with the ability to zeroize on demand.
pub trait SecureKey: ZeroizingKey + Zeroize {}

impl<T: ZeroizingKey + Zeroize> SecureKey for T {}
