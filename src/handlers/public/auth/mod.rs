// handlers/public/auth/mod.rs - tenant session endpoints

pub mod csrf;
pub mod impersonate;
pub mod login;
pub mod logout;
pub mod password;

pub use csrf::get as csrf_get;
pub use impersonate::get as impersonate_get;
pub use login::post as login_post;
pub use logout::post as logout_post;
pub use password::{forgot as forgot_password_post, reset as reset_password_post};
