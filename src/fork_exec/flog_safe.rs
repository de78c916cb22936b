use std::ffi::CStr;
use std::mem::MaybeUninit;

/// The buffer type we use for formatting an int as a C string.
/// 24 bytes is enough to format any i64 or u64.
type StackBuffer = MaybeUninit<[u8; 24]>;

/// Longest line emitted after fork; anything beyond is cut off.
const LINE_CAPACITY: usize = 1024;

fn format_int(buff: &mut StackBuffer, mut val: u64, neg: bool) -> &[u8] {
    // Note while panic is unsafe, we freely allow bounds checking and checked
    // arithmetic here, as StackBuffer is sufficient for any i64 or u64.
    if val == 0 {
        return b"0";
    }
    let buff: &mut [u8; 24] = buff.write([0; 24]);
    // Fill from the end so no reversal is needed.
    let mut cursor = buff.len();
    while val != 0 && cursor > 1 {
        buff[cursor - 1] = b'0' + (val % 10) as u8;
        val /= 10;
        cursor -= 1;
    }
    if neg {
        buff[cursor - 1] = b'-';
        cursor -= 1;
    }
    &buff[cursor..]
}

/// A value that can be appended to a [`SafeLine`] without allocating.
/// Bytes are assumed UTF-8 - only pass ASCII string literals here.
pub trait AsyncSafeDisplay {
    fn append_to(&self, line: &mut SafeLine);
}

impl AsyncSafeDisplay for &str {
    fn append_to(&self, line: &mut SafeLine) {
        line.push_bytes(self.as_bytes());
    }
}

impl AsyncSafeDisplay for &[u8] {
    fn append_to(&self, line: &mut SafeLine) {
        line.push_bytes(self);
    }
}

impl AsyncSafeDisplay for &CStr {
    fn append_to(&self, line: &mut SafeLine) {
        line.push_bytes(self.to_bytes());
    }
}

impl AsyncSafeDisplay for i32 {
    fn append_to(&self, line: &mut SafeLine) {
        let mut storage = StackBuffer::uninit();
        line.push_bytes(format_int(&mut storage, self.unsigned_abs().into(), *self < 0));
    }
}

impl AsyncSafeDisplay for i64 {
    fn append_to(&self, line: &mut SafeLine) {
        let mut storage = StackBuffer::uninit();
        line.push_bytes(format_int(&mut storage, self.unsigned_abs(), *self < 0));
    }
}

impl AsyncSafeDisplay for usize {
    fn append_to(&self, line: &mut SafeLine) {
        let mut storage = StackBuffer::uninit();
        line.push_bytes(format_int(&mut storage, *self as u64, false));
    }
}

/// One log line assembled on the stack and written with a single write(2), so lines from
/// sibling stages sharing a stderr do not interleave mid-line.
pub struct SafeLine {
    buf: [u8; LINE_CAPACITY],
    len: usize,
}

impl SafeLine {
    /// Start a line with the given category prefix.
    pub fn new(category: &str) -> Self {
        let mut line = SafeLine {
            buf: [0; LINE_CAPACITY],
            len: 0,
        };
        line.push_bytes(category.as_bytes());
        line.push_bytes(b": ");
        line
    }

    pub fn push(&mut self, val: impl AsyncSafeDisplay) {
        val.append_to(self);
    }

    fn push_bytes(&mut self, bytes: &[u8]) {
        // Keep one byte for the newline.
        let room = LINE_CAPACITY - 1 - self.len;
        let amt = bytes.len().min(room);
        self.buf[self.len..self.len + amt].copy_from_slice(&bytes[..amt]);
        self.len += amt;
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    /// Terminate the line and write it to `fd`. Errors are ignored: there is nobody left to
    /// tell.
    pub fn emit(mut self, fd: i32) {
        if fd < 0 {
            return;
        }
        self.buf[self.len] = b'\n';
        self.len += 1;
        // Note we deliberately do not retry on signals, etc.
        unsafe {
            let _ = libc::write(fd, self.buf.as_ptr().cast(), self.len);
        }
    }
}

/// Variant of FLOG which is async-safe to use after fork().
/// This does not allocate or take locks. Only str, byte slices, C-strings and integers are
/// supported. The arguments are NOT space-separated. Embed real spaces in your literals.
macro_rules! FLOG_SAFE {
    ($category:ident, $($elem:expr),+ $(,)*) => {
        if crate::flog::categories::$category
            .enabled
            .load(std::sync::atomic::Ordering::Relaxed)
        {
            let mut line = crate::fork_exec::flog_safe::SafeLine::new(
                crate::flog::categories::$category.name,
            );
            $(
                line.push($elem);
            )+
            line.emit(crate::flog::get_flog_file_fd());
        }
    };
}

pub(crate) use FLOG_SAFE;
