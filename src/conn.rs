// src/conn.rs
use crate::cache::BodyBytes;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnState {
    Free = 0,
    ReadingHeaders = 1,
    ReadingBody = 2,
    Dispatching = 3,
    Writing = 4,
    Closing = 5,
}

impl Default for ConnState {
    fn default() -> Self {
        ConnState::Free
    }
}

/// Per-connection session. Owns the socket fd, the accumulated request
/// bytes, and the in-flight response. The body source keeps mapped or
/// shared bytes alive across partial writes.
pub struct Conn {
    /// Socket fd while live; doubles as the free-list next index when Free.
    pub fd: i32,
    pub state: ConnState,

    /// Raw request bytes as read off the socket.
    pub read_buf: Vec<u8>,
    /// One past the CRLFCRLF, once the header block is complete.
    pub header_end: usize,
    /// Expected Content-Length for the current request.
    pub body_len: usize,

    /// Serialized status line + headers.
    pub write_head: Vec<u8>,
    pub body: BodyBytes,
    /// Bytes already written across head + body, for partial-write resume.
    pub write_pos: usize,

    pub keep_alive: bool,
    /// Seconds-resolution timestamp of the last successful read or write.
    pub last_active: u32,
    pub requests_served: u32,
}

impl Conn {
    pub fn empty() -> Self {
        Self {
            fd: -1,
            state: ConnState::Free,
            read_buf: Vec::new(),
            header_end: 0,
            body_len: 0,
            write_head: Vec::new(),
            body: BodyBytes::Empty,
            write_pos: 0,
            keep_alive: false,
            last_active: 0,
            requests_served: 0,
        }
    }

    /// Prepare for a fresh connection on `fd`. Buffers keep their capacity.
    pub fn open(&mut self, fd: i32, now: u32) {
        self.fd = fd;
        self.state = ConnState::ReadingHeaders;
        self.read_buf.clear();
        self.header_end = 0;
        self.body_len = 0;
        self.write_head.clear();
        self.body = BodyBytes::Empty;
        self.write_pos = 0;
        self.keep_alive = false;
        self.last_active = now;
        self.requests_served = 0;
    }

    /// Keep-alive recycle: drop the consumed request, keep any pipelined
    /// bytes the client already sent.
    pub fn recycle(&mut self) {
        let consumed = self.header_end + self.body_len;
        if consumed > 0 && consumed <= self.read_buf.len() {
            self.read_buf.drain(..consumed);
        } else {
            self.read_buf.clear();
        }
        self.header_end = 0;
        self.body_len = 0;
        self.write_head.clear();
        self.body = BodyBytes::Empty;
        self.write_pos = 0;
        self.state = ConnState::ReadingHeaders;
    }

    pub fn total_write_len(&self) -> usize {
        self.write_head.len() + self.body.len()
    }
}

impl Default for Conn {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_resets_session_state() {
        let mut conn = Conn::empty();
        conn.read_buf.extend_from_slice(b"old");
        conn.requests_served = 9;
        conn.open(7, 100);
        assert_eq!(conn.fd, 7);
        assert_eq!(conn.state, ConnState::ReadingHeaders);
        assert!(conn.read_buf.is_empty());
        assert_eq!(conn.requests_served, 0);
        assert_eq!(conn.last_active, 100);
    }

    #[test]
    fn test_recycle_keeps_pipelined_bytes() {
        let mut conn = Conn::empty();
        conn.open(3, 0);
        conn.read_buf
            .extend_from_slice(b"GET / HTTP/1.1\r\n\r\nGET /next HTTP/1.1\r\n\r\n");
        conn.header_end = 18;
        conn.body_len = 0;
        conn.requests_served = 1;
        conn.recycle();
        assert_eq!(conn.read_buf, b"GET /next HTTP/1.1\r\n\r\n");
        assert_eq!(conn.header_end, 0);
        assert_eq!(conn.state, ConnState::ReadingHeaders);
        assert_eq!(conn.requests_served, 1);
    }
}
