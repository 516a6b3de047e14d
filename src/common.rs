//! Platform constants and runtime configuration shared by every layer.

use log::warn;
use std::env;
use std::sync::OnceLock;

// Re-export architecture-specific items
pub(crate) use crate::arch::{Context, context_switch, entry_argument};

/// Stack size used when nothing else is configured, before page rounding.
pub const DEFAULT_STACK_SIZE: usize = 192 * 1024;

/// Size of a virtual memory page, queried once.
pub fn page_size() -> usize {
    static PAGE_SIZE: OnceLock<usize> = OnceLock::new();
    *PAGE_SIZE.get_or_init(|| {
        let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if size > 0 { size as usize } else { 4096 }
    })
}

/// Number of online processors, at least 1.
pub fn processor_count() -> usize {
    static PROCESSORS: OnceLock<usize> = OnceLock::new();
    *PROCESSORS.get_or_init(|| {
        let count = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_ONLN) };
        if count > 0 { count as usize } else { 1 }
    })
}

/// Round `size` up to a whole number of pages.
pub fn round_to_pages(size: usize) -> usize {
    let page = page_size();
    size.max(page).div_ceil(page) * page
}

/// Tunables of a [`SharedDispatcher`](crate::dispatcher::SharedDispatcher).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Usable bytes of every physical stack, a multiple of the page size.
    pub stack_size: usize,
    /// How many idle queues (and their stacks) are kept for reuse.
    pub pool_capacity: usize,
    /// Map an inaccessible page below every stack.
    pub guard_page: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            stack_size: round_to_pages(DEFAULT_STACK_SIZE),
            pool_capacity: processor_count() * 2,
            guard_page: true,
        }
    }
}

impl Config {
    /// Defaults overridden by `COSTACK_STACK_SIZE`, `COSTACK_POOL_CAPACITY`
    /// and `COSTACK_GUARD_PAGE`.
    pub fn from_env() -> Self {
        let mut config = Config::default();
        if let Some(size) = read_env("COSTACK_STACK_SIZE", |v| v.parse::<usize>().ok()) {
            config = config.with_stack_size(size);
        }
        if let Some(capacity) = read_env("COSTACK_POOL_CAPACITY", |v| v.parse::<usize>().ok()) {
            config = config.with_pool_capacity(capacity);
        }
        if let Some(guard) = read_env("COSTACK_GUARD_PAGE", parse_flag) {
            config = config.with_guard_page(guard);
        }
        config
    }

    pub fn with_stack_size(mut self, size: usize) -> Self {
        self.stack_size = round_to_pages(size);
        self
    }

    pub fn with_pool_capacity(mut self, capacity: usize) -> Self {
        self.pool_capacity = capacity;
        self
    }

    pub fn with_guard_page(mut self, guard: bool) -> Self {
        self.guard_page = guard;
        self
    }
}

fn read_env<T>(key: &str, parse: impl FnOnce(&str) -> Option<T>) -> Option<T> {
    let raw = env::var(key).ok()?;
    let parsed = parse(raw.trim());
    if parsed.is_none() {
        warn!("ignoring {key}={raw:?}: not a valid value");
    }
    parsed
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
