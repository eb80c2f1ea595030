pub mod authz;
pub mod hmac;
pub mod principal;

pub use authz::AuthorizationFilter;
pub use principal::Principal;
