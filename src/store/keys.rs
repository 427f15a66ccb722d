//! Cache key builders. Keep in sync with the invalidation sets in the
//! mutation methods.

use uuid::Uuid;

pub const PREFIX_ROUTE: &str = "route:";
pub const PREFIX_ROUTE_SOURCE_AUTHS: &str = "route_source_auths:";
pub const PREFIX_TARGET_AUTH_FOR_ROUTE: &str = "target_auth_for_route:";
pub const PREFIX_DNS: &str = "dns:";

pub const LIST_SOURCE_SERVERS: &str = "list:source_servers";
pub const LIST_TARGET_SERVERS: &str = "list:target_servers";
pub const LIST_ROUTES: &str = "list:routes";
pub const LIST_AUTHENTICATIONS: &str = "list:authentications";

pub fn source_server(id: Uuid) -> String {
    format!("source_server:{id}")
}

pub fn target_server(id: Uuid) -> String {
    format!("target_server:{id}")
}

pub fn route(id: Uuid) -> String {
    format!("route:{id}")
}

pub fn route_method_path(source_id: Uuid, method: &str, path: &str) -> String {
    format!("route:method_path:{source_id}:{method}:{path}")
}

pub fn route_source_path(path: &str) -> String {
    format!("route:source_path:{path}")
}

pub fn route_target_path(path: &str) -> String {
    format!("route:target_path:{path}")
}

pub fn auth(id: Uuid) -> String {
    format!("auth:{id}")
}

pub fn route_source_auths(route_id: Uuid) -> String {
    format!("{PREFIX_ROUTE_SOURCE_AUTHS}{route_id}")
}

pub fn target_auth_for_route(route_id: Uuid) -> String {
    format!("{PREFIX_TARGET_AUTH_FOR_ROUTE}{route_id}")
}

pub fn server_options(source_id: Uuid) -> String {
    format!("server_options:{source_id}")
}

pub fn acl_options(source_id: Uuid) -> String {
    format!("acl_options:{source_id}")
}

pub fn dns(ip: &str) -> String {
    format!("{PREFIX_DNS}{ip}")
}
