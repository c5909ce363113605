pub mod jwt;
pub mod middleware;
pub mod password;

pub use jwt::{Claims, JwtHandler};
pub use middleware::AuthUser;
