//! World selection and address derivation.
//!
//! Every game world is reachable under a host of the form
//! `world<N>.caravel.gg`; the client pack, the parameter page, and the
//! revision oracle all hang off that host. A world number is considered
//! valid when its derived host actually resolves in DNS.

use std::net::ToSocketAddrs;

/// World used when nothing else is configured.
pub const DEFAULT_WORLD: u32 = 2;

/// Port the revision oracle listens on.
pub const ORACLE_PORT: u16 = 43594;

/// Resource path of the downloadable client pack.
pub const CLIENT_PACK_RESOURCE: &str = "clientpack";

/// Resource path of the client parameter page.
pub const PARAMETER_PAGE_RESOURCE: &str = "params";

const HOST_PREFIX: &str = "world";
const HOST_SUFFIX: &str = ".caravel.gg";

/// Returns the hostname serving the given world.
pub fn host_for_world(world: u32) -> String {
    format!("{HOST_PREFIX}{world}{HOST_SUFFIX}")
}

/// Address of the client pack download for the given world.
pub fn client_pack_url(world: u32) -> String {
    format!("http://{}/{CLIENT_PACK_RESOURCE}", host_for_world(world))
}

/// Address of the parameter page for the given world.
pub fn parameter_page_url(world: u32) -> String {
    format!("http://{}/{PARAMETER_PAGE_RESOURCE}", host_for_world(world))
}

/// Checks whether a world number maps to a resolvable host.
pub fn is_valid_world(world: u32) -> bool {
    (host_for_world(world).as_str(), ORACLE_PORT)
        .to_socket_addrs()
        .map(|mut addresses| addresses.next().is_some())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_embeds_world_number() {
        assert_eq!(host_for_world(2), "world2.caravel.gg");
        assert_eq!(host_for_world(117), "world117.caravel.gg");
    }

    #[test]
    fn derived_urls_point_at_world_host() {
        assert_eq!(client_pack_url(3), "http://world3.caravel.gg/clientpack");
        assert_eq!(parameter_page_url(3), "http://world3.caravel.gg/params");
    }

    #[test]
    fn unresolvable_world_is_invalid() {
        assert!(!is_valid_world(u32::MAX));
    }
}
