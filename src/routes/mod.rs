/// Router Module Index
///
/// Splits the API by access level. Access control is attached per router in
/// `create_router`, so a handler cannot end up exposed at the wrong level by
/// accident.

/// Routes open to anonymous clients (reads, registration, login).
pub mod public;

/// Routes behind the `AuthUser` middleware.
pub mod authenticated;

/// Routes behind the `AdminUser` middleware.
pub mod admin;
