// src/worker.rs
use crate::cache::{BodyBytes, ServeOutcome, StaticFileCache};
use crate::config::ServerConfig;
use crate::conn::{Conn, ConnState};
use crate::handler::{self, AppHandler};
use crate::http::{Method, ResponseData};
use crate::metrics::WorkerMetrics;
use crate::mime;
use crate::parser::{self, ParsedRequest, RequestParser};
use crate::router::RouteTable;
use crate::slab::ConnectionSlab;
use crate::syscalls::{self, epoll_event, Epoll, EPOLLIN, EPOLLOUT};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

const PIPE_TOKEN: u64 = u64::MAX;
const SLAB_CAPACITY: usize = 65_536;

enum ReadOutcome {
    Progress,
    Eof,
    Error,
}

enum Step {
    NeedMore,
    ResponseReady,
}

enum WriteResult {
    Done,
    Partial,
    Error,
}

enum PumpResult {
    Keep,
    Close,
}

/// One reactor thread: drives every session handed to it by the acceptor
/// through READING_HEADERS -> READING_BODY -> DISPATCHING -> WRITING and
/// back around for keep-alive.
pub struct Worker {
    id: usize,
    config: Arc<ServerConfig>,
    router: Arc<RouteTable>,
    cache: Arc<StaticFileCache>,
    parser: Arc<RequestParser>,
    handler: Option<AppHandler>,
    metrics: Arc<WorkerMetrics>,
    pipe_fd: i32,
    scratch: Vec<u8>,
}

impl Worker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: usize,
        config: Arc<ServerConfig>,
        router: Arc<RouteTable>,
        cache: Arc<StaticFileCache>,
        parser: Arc<RequestParser>,
        handler: Option<AppHandler>,
        metrics: Arc<WorkerMetrics>,
        pipe_fd: i32,
    ) -> Self {
        let scratch = vec![0u8; config.io_buffer_size.max(1024)];
        Self {
            id,
            config,
            router,
            cache,
            parser,
            handler,
            metrics,
            pipe_fd,
            scratch,
        }
    }

    pub fn run(&mut self, shutdown: Arc<AtomicBool>) {
        let epoll = match Epoll::new() {
            Ok(e) => e,
            Err(e) => {
                warn!(worker = self.id, error = %e, "failed to create event queue");
                return;
            }
        };
        if let Err(e) = epoll.add(self.pipe_fd, PIPE_TOKEN, EPOLLIN) {
            warn!(worker = self.id, error = %e, "failed to register accept pipe");
            return;
        }

        let mut slab = ConnectionSlab::new(SLAB_CAPACITY);
        let mut events = vec![epoll_event { events: 0, u64: 0 }; 1024];

        info!(worker = self.id, "worker entering event loop");

        let timeout_secs = self.config.keep_alive_timeout.as_secs() as u32;
        let mut now = epoch_secs();
        let mut last_prune = now;

        while !shutdown.load(Ordering::Acquire) {
            let n = match epoll.wait(&mut events, 1000) {
                Ok(n) => n,
                Err(_) => continue, // interrupted
            };

            now = epoch_secs();

            for i in 0..n {
                let token = events[i].u64;
                let readable = (events[i].events & EPOLLIN as u32) != 0;

                if token == PIPE_TOKEN {
                    self.drain_accept_pipe(&epoll, &mut slab, now);
                    continue;
                }

                let idx = token as usize;
                let fd = match slab.get(idx) {
                    Some(conn) if conn.state != ConnState::Free => conn.fd,
                    _ => continue,
                };

                let mut close = false;
                if let Some(conn) = slab.get_mut(idx) {
                    if readable
                        && matches!(
                            conn.state,
                            ConnState::ReadingHeaders | ConnState::ReadingBody
                        )
                    {
                        match self.fill_read_buffer(conn) {
                            ReadOutcome::Progress => {}
                            ReadOutcome::Eof => close = true,
                            ReadOutcome::Error => {
                                self.metrics.inc_errors();
                                close = true;
                            }
                        }
                    }

                    if !close {
                        match self.pump(conn, &epoll, idx, &shutdown) {
                            PumpResult::Keep => conn.last_active = now,
                            PumpResult::Close => close = true,
                        }
                    }
                }

                if close {
                    epoll.delete(fd).ok();
                    syscalls::close_fd(fd);
                    slab.free(idx);
                    self.metrics.dec_conn();
                }
            }

            if now.wrapping_sub(last_prune) >= 1 {
                self.prune_idle(&epoll, &mut slab, now, timeout_secs);
                last_prune = now;
            }
        }

        // Drop whatever is still connected; shutdown is not graceful per-session.
        for i in 0..slab.high_water() {
            if let Some(conn) = slab.get(i) {
                if conn.state != ConnState::Free {
                    syscalls::close_fd(conn.fd);
                }
            }
        }
        info!(worker = self.id, "worker exiting");
    }

    fn drain_accept_pipe(&mut self, epoll: &Epoll, slab: &mut ConnectionSlab, now: u32) {
        loop {
            match syscalls::recv_fd_from_pipe(self.pipe_fd) {
                Ok(Some(client_fd)) => match slab.allocate(client_fd, now) {
                    Some(idx) => {
                        if epoll.add(client_fd, idx as u64, EPOLLIN).is_err() {
                            slab.free(idx);
                            syscalls::close_fd(client_fd);
                        } else {
                            self.metrics.inc_conn();
                        }
                    }
                    None => {
                        // Out of slots: shed load at the door.
                        debug!(worker = self.id, "connection slab full, dropping accept");
                        syscalls::close_fd(client_fd);
                    }
                },
                Ok(None) => break,
                Err(_) => break,
            }
        }
    }

    fn fill_read_buffer(&mut self, conn: &mut Conn) -> ReadOutcome {
        loop {
            match syscalls::read_nonblocking(conn.fd, &mut self.scratch) {
                Ok(Some(0)) => return ReadOutcome::Eof,
                Ok(Some(n)) => {
                    conn.read_buf.extend_from_slice(&self.scratch[..n]);
                    self.metrics.add_bytes_received(n);
                }
                Ok(None) => return ReadOutcome::Progress,
                Err(_) => return ReadOutcome::Error,
            }
        }
    }

    /// Drive the session forward until it needs more bytes or should close.
    /// A completed keep-alive response recycles the session and immediately
    /// retries, so pipelined requests already buffered get served.
    fn pump(
        &mut self,
        conn: &mut Conn,
        epoll: &Epoll,
        idx: usize,
        shutdown: &AtomicBool,
    ) -> PumpResult {
        loop {
            if conn.state == ConnState::Writing {
                match self.flush_write(conn) {
                    WriteResult::Done => {
                        if conn.keep_alive && !shutdown.load(Ordering::Acquire) {
                            let _ = epoll.modify(conn.fd, idx as u64, EPOLLIN);
                            conn.recycle();
                            continue;
                        }
                        // Fully flushed: half-close so the peer sees EOF
                        // after draining what was sent.
                        syscalls::shutdown_write(conn.fd);
                        return PumpResult::Close;
                    }
                    WriteResult::Partial => {
                        let _ = epoll.modify(conn.fd, idx as u64, EPOLLIN | EPOLLOUT);
                        return PumpResult::Keep;
                    }
                    WriteResult::Error => {
                        // Peer reset mid-write: logged-and-dropped.
                        debug!(worker = self.id, fd = conn.fd, "write failed, dropping session");
                        self.metrics.inc_errors();
                        return PumpResult::Close;
                    }
                }
            }

            match self.advance(conn) {
                Step::NeedMore => return PumpResult::Keep,
                Step::ResponseReady => continue,
            }
        }
    }

    fn advance(&mut self, conn: &mut Conn) -> Step {
        loop {
            match conn.state {
                ConnState::ReadingHeaders => {
                    match parser::find_header_end(&conn.read_buf) {
                        Some(end) => {
                            conn.header_end = end;
                            match parser::content_length_of(&conn.read_buf[..end]) {
                                Ok(len) if len > self.config.max_request_size => {
                                    self.respond_error(conn, 400, "Request body too large");
                                    return Step::ResponseReady;
                                }
                                Ok(len) => {
                                    conn.body_len = len;
                                    conn.state = ConnState::ReadingBody;
                                }
                                Err(_) => {
                                    self.respond_error(conn, 400, "Malformed Content-Length");
                                    return Step::ResponseReady;
                                }
                            }
                        }
                        None if conn.read_buf.len() > self.config.max_header_size => {
                            self.respond_error(conn, 400, "Header block too large");
                            return Step::ResponseReady;
                        }
                        None => return Step::NeedMore,
                    }
                }
                ConnState::ReadingBody => {
                    if conn.read_buf.len() >= conn.header_end + conn.body_len {
                        conn.state = ConnState::Dispatching;
                    } else {
                        return Step::NeedMore;
                    }
                }
                ConnState::Dispatching => {
                    self.dispatch(conn);
                    return Step::ResponseReady;
                }
                _ => return Step::NeedMore,
            }
        }
    }

    fn dispatch(&mut self, conn: &mut Conn) {
        let head = &conn.read_buf[..conn.header_end];
        let body = &conn.read_buf[conn.header_end..conn.header_end + conn.body_len];

        let request = match self.parser.parse(head, body) {
            Ok(r) => r,
            Err(_) => {
                self.respond_error(conn, 400, "Malformed request");
                return;
            }
        };

        self.metrics.inc_req();
        conn.requests_served += 1;

        // HTTP/1.1 defaults to keep-alive per RFC 7230.
        let mut keep_alive = request.protocol_version == "HTTP/1.1";
        if let Some(value) = request.headers.get("connection") {
            if value.eq_ignore_ascii_case("close") {
                keep_alive = false;
            } else if value.eq_ignore_ascii_case("keep-alive") {
                keep_alive = true;
            }
        }
        if conn.requests_served >= self.config.max_requests_per_connection {
            keep_alive = false;
        }

        // Validation gate before any routing.
        if !request.method.is_dispatchable() {
            self.respond_error(conn, 400, "Unknown HTTP-method");
            return;
        }
        if request.path.is_empty() || !request.path.starts_with('/') || request.path.contains("..")
        {
            self.respond_error(conn, 400, "Illegal request-target");
            return;
        }

        if self.cache.matches_route(&request.path) {
            self.dispatch_static(conn, &request, keep_alive);
        } else {
            self.dispatch_application(conn, request, keep_alive);
        }
    }

    fn dispatch_application(&mut self, conn: &mut Conn, mut request: ParsedRequest, keep_alive: bool) {
        let matched = self.router.match_route(&request.path);
        if matched.matched {
            request.params = matched.params;
            request.handler_id = Some(matched.handler_id);
        }

        let is_head = request.method == Method::Head;
        let response = handler::dispatch(self.handler.as_ref(), &request);
        let keep_alive = keep_alive && !response.forces_close();

        conn.keep_alive = keep_alive;
        conn.write_head = response.serialize_head(response.body.len(), keep_alive);
        conn.body = if is_head {
            BodyBytes::Empty
        } else {
            BodyBytes::Owned(response.body)
        };
        conn.write_pos = 0;
        conn.state = ConnState::Writing;
    }

    fn dispatch_static(&mut self, conn: &mut Conn, request: &ParsedRequest, keep_alive: bool) {
        let is_head = request.method == Method::Head;

        match self.cache.serve(&request.path, &request.headers) {
            ServeOutcome::Success(served) => {
                let status = if served.is_partial_content { 206 } else { 200 };
                let mut response = ResponseData::new(status);
                response
                    .headers
                    .push(("Content-Type".to_string(), served.content_type.to_string()));
                if !served.etag.is_empty() {
                    response.headers.push(("ETag".to_string(), served.etag.clone()));
                }
                response.headers.push((
                    "Last-Modified".to_string(),
                    mime::format_http_date(served.last_modified),
                ));
                if served.is_partial_content {
                    response.headers.push((
                        "Content-Range".to_string(),
                        format!(
                            "bytes {}-{}/{}",
                            served.range_start, served.range_end, served.total_size
                        ),
                    ));
                }
                if let Some(encoding) = served.encoding {
                    response
                        .headers
                        .push(("Content-Encoding".to_string(), encoding.to_string()));
                }

                conn.keep_alive = keep_alive;
                conn.write_head =
                    response.serialize_head(served.content_length as usize, keep_alive);
                conn.body = if is_head { BodyBytes::Empty } else { served.body };
                conn.write_pos = 0;
                conn.state = ConnState::Writing;
            }
            ServeOutcome::NotModified {
                etag,
                last_modified,
            } => {
                let mut response = ResponseData::new(304);
                if !etag.is_empty() {
                    response.headers.push(("ETag".to_string(), etag));
                }
                response.headers.push((
                    "Last-Modified".to_string(),
                    mime::format_http_date(last_modified),
                ));

                conn.keep_alive = keep_alive;
                conn.write_head = response.serialize_head(0, keep_alive);
                conn.body = BodyBytes::Empty;
                conn.write_pos = 0;
                conn.state = ConnState::Writing;
            }
            ServeOutcome::NotFound => self.respond_error(conn, 404, "File not found"),
            ServeOutcome::Forbidden => self.respond_error(conn, 403, "Access denied"),
            ServeOutcome::RangeNotSatisfiable => {
                self.respond_error(conn, 416, "Requested range not satisfiable")
            }
            ServeOutcome::InternalError => {
                self.respond_error(conn, 500, "Error serving static file")
            }
        }
    }

    /// Engine-generated error: minimal HTML body, connection closes after.
    fn respond_error(&mut self, conn: &mut Conn, status: u16, message: &str) {
        let response = ResponseData::error(status, message);
        conn.keep_alive = false;
        conn.write_head = response.serialize_head(response.body.len(), false);
        conn.body = BodyBytes::Owned(response.body);
        conn.write_pos = 0;
        conn.state = ConnState::Writing;
    }

    fn flush_write(&mut self, conn: &mut Conn) -> WriteResult {
        loop {
            let head_len = conn.write_head.len();
            let total = conn.total_write_len();
            if conn.write_pos >= total {
                return WriteResult::Done;
            }

            let result = if conn.write_pos < head_len {
                let head_rest = &conn.write_head[conn.write_pos..];
                let body = conn.body.as_slice();
                if body.is_empty() {
                    syscalls::write_nonblocking(conn.fd, head_rest)
                } else {
                    syscalls::writev_nonblocking(conn.fd, &[head_rest, body])
                }
            } else {
                let body = conn.body.as_slice();
                syscalls::write_nonblocking(conn.fd, &body[conn.write_pos - head_len..])
            };

            match result {
                Ok(Some(0)) | Ok(None) => return WriteResult::Partial,
                Ok(Some(n)) => {
                    conn.write_pos += n;
                    self.metrics.add_bytes_sent(n);
                }
                Err(_) => return WriteResult::Error,
            }
        }
    }

    /// Idle sessions time out without a response.
    fn prune_idle(
        &mut self,
        epoll: &Epoll,
        slab: &mut ConnectionSlab,
        now: u32,
        timeout_secs: u32,
    ) {
        for idx in 0..slab.high_water() {
            let expired = match slab.get(idx) {
                Some(conn) => {
                    conn.state != ConnState::Free
                        && now.wrapping_sub(conn.last_active) > timeout_secs
                }
                None => false,
            };
            if expired {
                let fd = slab.get(idx).map(|c| c.fd).unwrap_or(-1);
                debug!(worker = self.id, fd, "closing idle connection");
                epoll.delete(fd).ok();
                syscalls::close_fd(fd);
                slab.free(idx);
                self.metrics.dec_conn();
            }
        }
    }
}

fn epoch_secs() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}
