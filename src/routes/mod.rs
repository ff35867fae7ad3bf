pub mod api;
pub mod common;
pub mod table;

pub use api::{api_routes, app};
pub use common::{common_routes, common_routes_with_ready};
pub use table::{RouteMatch, RouteRule, RouteTable};
