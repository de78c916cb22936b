mod pipeline;

pub mod prelude {
    use once_cell::sync::OnceCell;

    pub use serial_test::serial;

    /// Process-wide setup shared by every test that forks or logs.
    pub fn test_init() {
        static DONE: OnceCell<()> = OnceCell::new();
        DONE.get_or_init(|| {
            crate::flog::init_from_env();
        });
    }

    /// The number of descriptors this process has open.
    pub fn open_fd_count() -> usize {
        #[cfg(any(apple, bsd))]
        let dir = "/dev/fd";
        #[cfg(not(any(apple, bsd)))]
        let dir = "/proc/self/fd";
        // Reading the directory opens one more descriptor, counted on every call alike.
        std::fs::read_dir(dir)
            .expect("descriptor directory should be readable")
            .count()
    }

    /// Whether this process has no children left, running or zombie.
    pub fn no_children_left() -> bool {
        let mut status = 0;
        let ret = unsafe { libc::waitpid(-1, &mut status, libc::WNOHANG) };
        ret == -1 && errno::errno().0 == libc::ECHILD
    }
}
