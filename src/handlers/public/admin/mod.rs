// handlers/public/admin/mod.rs - back-office login (before an admin session exists)

pub mod login;

pub use login::post as login_post;
pub use login::verify_two_factor as verify_two_factor_post;
