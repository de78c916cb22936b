use crate::common::write_loop;
use libc::c_int;
use once_cell::sync::OnceCell;
use std::os::fd::BorrowedFd;
use std::sync::atomic::{AtomicI32, Ordering};

/// The environment variable holding the initial set of debug categories.
pub const DEBUG_ENV_VAR: &str = "PIPELAY_DEBUG";

#[rustfmt::skip::macros(category)]
pub mod categories {
    use std::sync::atomic::AtomicBool;

    pub struct category_t {
        pub name: &'static str,
        pub description: &'static str,
        pub enabled: AtomicBool,
    }

    /// Macro to declare a static variable identified by $var,
    /// with the given name and description, and optionally enabled by default.
    macro_rules! declare_category {
        (
            ($var:ident, $name:literal, $description:literal, $enabled:expr)
        ) => {
            pub static $var: category_t = category_t {
                name: $name,
                description: $description,
                enabled: AtomicBool::new($enabled),
            };
        };
        (
            ($var:ident, $name:expr, $description:expr)
        ) => {
            declare_category!(($var, $name, $description, false));
        };
    }

    /// Macro to extract the variable name for a category.
    macro_rules! category_name {
        (($var:ident, $name:literal, $description:literal, $enabled:expr)) => {
            $var
        };
        (($var:ident, $name:literal, $description:literal)) => {
            $var
        };
    }

    macro_rules! categories {
        (
            // A repetition of categories, separated by semicolons.
            $($cats:tt);*

            // Allow trailing semicolon.
            $(;)?
        ) => {
            $(
                declare_category!($cats);
            )*

            pub fn all_categories() -> Vec<&'static category_t> {
                vec![
                    $(
                        & category_name!($cats),
                    )*
                ]
            }
        };
    }

    categories!(
        (error, "error", "Serious unexpected errors (on by default)", true);

        (warning, "warning", "Warnings (on by default)", true);

        (exec, "exec", "Errors reported by exec in a pipeline stage (on by default)", true);

        (exec_job, "exec-job", "Pipelines being run");

        (exec_fork, "exec-fork", "Calls to fork()");

        (exec_pipe, "exec-pipe", "Creating and wiring pipe segments");

        (proc_reap, "proc-reap", "Reaping pipeline stages");

        (pipe_io, "pipe-io", "Feeding input and collecting output");

        (record_reader, "record-reader", "Buffer shifts and growth in the record reader");
    );
}

/// FLOG formats values. By default we would like to use Display, and fall back to Debug.
/// However that would require specialization. So instead we make two "separate" traits, bring them both in scope,
/// and let Rust figure it out.
/// Clients can opt a Debug type into Floggable by implementing FloggableDebug:
///    impl FloggableDebug for MyType {}
pub trait FloggableDisplay {
    /// Return a string representation of this thing.
    fn to_flog_str(&self) -> String;
}

impl<T: std::fmt::Display> FloggableDisplay for T {
    fn to_flog_str(&self) -> String {
        self.to_string()
    }
}

pub trait FloggableDebug: std::fmt::Debug {
    fn to_flog_str(&self) -> String {
        format!("{:?}", self)
    }
}

/// Write to our FLOG file.
pub fn flog_impl(s: &str) {
    let fd = get_flog_file_fd();
    if fd < 0 {
        return;
    }
    let _ = write_loop(&unsafe { BorrowedFd::borrow_raw(fd) }, s.as_bytes());
}

/// The entry point for flogging.
#[macro_export]
macro_rules! FLOG {
    ($category:ident, $($elem:expr),+ $(,)*) => {
        if $crate::flog::categories::$category.enabled.load(std::sync::atomic::Ordering::Relaxed) {
            #[allow(unused_imports)]
            use $crate::flog::{FloggableDisplay, FloggableDebug};
            let mut vs = vec![format!("{}:", $crate::flog::categories::$category.name)];
            $(
                {
                   vs.push($elem.to_flog_str())
                }
            )+
            // We don't use locking here so we have to append our own newline to avoid multiple writes.
            let mut v = vs.join(" ");
            v.push('\n');
            $crate::flog::flog_impl(&v);
        }
    };
}

#[macro_export]
macro_rules! should_flog {
    ($category:ident) => {
        $crate::flog::categories::$category
            .enabled
            .load(std::sync::atomic::Ordering::Relaxed)
    };
}

pub use {should_flog, FLOG};

/// Match a category name against a pattern supporting `*` and `?`.
fn wildcard_match(name: &str, pattern: &str) -> bool {
    let name = name.as_bytes();
    let pattern = pattern.as_bytes();
    let (mut n, mut p) = (0, 0);
    // Position of the last `*` seen, and the name position it was matched against.
    let mut backtrack: Option<(usize, usize)> = None;
    while n < name.len() {
        match pattern.get(p) {
            Some(b'*') => {
                backtrack = Some((p, n));
                p += 1;
            }
            Some(&c) if c == b'?' || c == name[n] => {
                n += 1;
                p += 1;
            }
            _ => match backtrack {
                Some((star, matched)) => {
                    p = star + 1;
                    n = matched + 1;
                    backtrack = Some((star, matched + 1));
                }
                None => return false,
            },
        }
    }
    pattern[p..].iter().all(|&c| c == b'*')
}

/// For each category, if its name matches the wildcard, set its enabled to the given sense.
fn apply_one_wildcard(wc: &str, sense: bool) {
    let mut match_found = false;
    for cat in categories::all_categories() {
        if wildcard_match(cat.name, wc) {
            cat.enabled.store(sense, Ordering::Relaxed);
            match_found = true;
        }
    }
    if !match_found {
        FLOG!(warning, "Failed to match debug category:", wc);
    }
}

/// Set the active flog categories according to the given wildcard `wc`.
///
/// The pattern is a comma-separated list; an entry starting with `-` disables the categories it
/// matches.
pub fn activate_flog_categories_by_pattern(wc: &str) {
    // Normalize underscores to dashes, allowing the user to be sloppy.
    let wc = wc.replace('_', "-");
    for s in wc.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        match s.strip_prefix('-') {
            Some(s) => apply_one_wildcard(s, false),
            None => apply_one_wildcard(s, true),
        }
    }
}

/// Apply [`DEBUG_ENV_VAR`] to the categories. Only the first call in a process has any effect.
pub fn init_from_env() {
    static DONE: OnceCell<()> = OnceCell::new();
    DONE.get_or_init(|| {
        if let Ok(pattern) = std::env::var(DEBUG_ENV_VAR) {
            activate_flog_categories_by_pattern(&pattern);
        }
    });
}

/// The flog output fd. Defaults to stderr. A value < 0 disables flog.
static FLOG_FD: AtomicI32 = AtomicI32::new(libc::STDERR_FILENO);

pub fn set_flog_file_fd(fd: c_int) {
    FLOG_FD.store(fd, Ordering::Relaxed);
}

#[inline]
pub fn get_flog_file_fd() -> c_int {
    FLOG_FD.load(Ordering::Relaxed)
}

/// One line per category: its name, whether it is on, and what it logs. Suitable for a
/// `--print-debug-categories` style listing in an application.
pub fn describe_categories() -> String {
    let cats = categories::all_categories();
    let width = cats.iter().map(|c| c.name.len()).max().unwrap_or(0);
    let mut out = String::new();
    for cat in cats {
        let state = if cat.enabled.load(Ordering::Relaxed) {
            "on "
        } else {
            "off"
        };
        out.push_str(&format!(
            "{:width$} {} {}\n",
            cat.name,
            state,
            cat.description,
            width = width
        ));
    }
    out
}
