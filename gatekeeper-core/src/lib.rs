//! Domain types shared by the gatekeeper admission service.
//!
//! Nothing in this crate performs I/O: it holds the identifiers, the
//! pending-member record, the incoming message shape and the message
//! templates. The server crate wires these into stores and gateways.

pub mod member;
pub mod message;
pub mod template;

pub use member::*;
pub use message::*;
pub use template::*;

mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

/// Short version string for the running bot.
pub fn get_bot_version() -> String {
    // An explicit hash from the packaging environment wins over git detection
    if let Some(git_hash) = option_env!("GATEKEEPER_GIT_HASH") {
        short_hash(git_hash)
    } else if let Some(git_hash) = built_info::GIT_COMMIT_HASH {
        short_hash(git_hash)
    } else {
        built_info::PKG_VERSION.to_string()
    }
}

fn short_hash(hash: &str) -> String {
    hash.chars().take(8).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_hash_truncates_to_eight() {
        assert_eq!(short_hash("0123456789abcdef"), "01234567");
    }

    #[test]
    fn test_short_hash_keeps_short_input() {
        assert_eq!(short_hash("abc"), "abc");
    }
}
