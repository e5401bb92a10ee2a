//! Authentication: JWT bearer validation.

mod jwt;

pub use jwt::{Claims, JwtSecret};
