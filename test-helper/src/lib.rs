mod addr;
mod keys;
mod listener;

pub use addr::{get_unused_addr, get_unused_addrs};
pub use keys::random_keys;
pub use listener::{full_listener, FullListener};
