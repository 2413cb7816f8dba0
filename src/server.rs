// src/server.rs
use crate::config::{ServerConfig, StaticCacheConfig};
use crate::cache::StaticFileCache;
use crate::handler::AppHandler;
use crate::http::ResponseData;
use crate::metrics::{ServerStats, WorkerMetrics};
use crate::parser::{ParsedRequest, RequestParser};
use crate::router::RouteTable;
use crate::syscalls;
use crate::worker::Worker;
use crate::error::PySpeedResult;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{error, info};

/// HTTP front-end: owns the listener, the worker pool, the route table, the
/// static cache, and the application bridge callback.
///
/// ```no_run
/// use pyspeed::{ResponseData, Server};
///
/// let mut server = Server::bind("0.0.0.0:8080");
/// server.static_route("/static", "./static");
/// server.app_handler(|req| ResponseData::json(format!("{{\"path\":\"{}\"}}", req.path)));
/// server.serve().unwrap();
/// ```
pub struct Server {
    config: ServerConfig,
    router: RouteTable,
    cache: Arc<StaticFileCache>,
    parser: Arc<RequestParser>,
    handler: Option<AppHandler>,
}

impl Server {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            router: RouteTable::new(),
            cache: Arc::new(StaticFileCache::new(StaticCacheConfig::default())),
            parser: Arc::new(RequestParser::new()),
            handler: None,
        }
    }

    /// Parse `host:port` into a default configuration.
    pub fn bind(host_port: &str) -> Self {
        let mut config = ServerConfig::default();
        if let Some((host, port)) = host_port.rsplit_once(':') {
            config.address = host.to_string();
            if let Ok(port) = port.parse() {
                config.port = port;
            }
        }
        Self::new(config)
    }

    pub fn workers(&mut self, workers: usize) -> &mut Self {
        self.config.threads = workers.max(1);
        self
    }

    /// Replace the static cache wholesale. Call before `static_route`; any
    /// previously registered static routes are dropped with the old cache.
    pub fn static_cache(&mut self, config: StaticCacheConfig) -> &mut Self {
        self.cache = Arc::new(StaticFileCache::new(config));
        self
    }

    /// Map a URL prefix onto a local directory for the static pipeline.
    pub fn static_route(&mut self, url_prefix: &str, local_root: impl Into<PathBuf>) -> &mut Self {
        self.cache.add_route(url_prefix, local_root);
        self
    }

    /// Register a `{name}`-style route. The matched handler id and params
    /// ride on the request into the application callback.
    pub fn route(&mut self, pattern: &str, handler_id: &str) -> &mut Self {
        self.router.add_route(pattern, handler_id);
        self
    }

    /// Register the application bridge callback.
    pub fn app_handler<F>(&mut self, handler: F) -> &mut Self
    where
        F: Fn(&ParsedRequest) -> ResponseData + Send + Sync + 'static,
    {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// Shared handle to the static cache, e.g. for stats or invalidation.
    pub fn cache(&self) -> Arc<StaticFileCache> {
        self.cache.clone()
    }

    /// Shared handle to the request parser, e.g. for its counters.
    pub fn request_parser(&self) -> Arc<RequestParser> {
        self.parser.clone()
    }

    /// Run until ctrl-c. Blocks the calling thread.
    pub fn serve(self) -> PySpeedResult<()> {
        let workers = self.config.threads.max(1);
        let config = Arc::new(self.config);
        let router = Arc::new(self.router);
        let shutdown = Arc::new(AtomicBool::new(false));
        let start_time = Instant::now();

        let shutdown_signal = shutdown.clone();
        ctrlc::set_handler(move || {
            info!("received SIGINT, initiating shutdown");
            shutdown_signal.store(true, Ordering::SeqCst);
        })
        .expect("failed to set SIGINT handler");

        // ---- Per-worker metrics + periodic report ----
        let mut worker_metrics = Vec::with_capacity(workers);
        for _ in 0..workers {
            worker_metrics.push(Arc::new(WorkerMetrics::new()));
        }

        let metrics_clones = worker_metrics.clone();
        let shutdown_metrics = shutdown.clone();
        thread::Builder::new()
            .name("pyspeed-metrics".to_string())
            .spawn(move || {
                while !shutdown_metrics.load(Ordering::Acquire) {
                    thread::sleep(Duration::from_secs(5));
                    if shutdown_metrics.load(Ordering::Acquire) {
                        break;
                    }
                    let total = ServerStats::aggregate(metrics_clones.iter().map(Arc::as_ref));
                    info!(
                        active_conns = total.active_conns,
                        requests = total.requests_processed,
                        bytes_sent = total.bytes_sent,
                        errors = total.errors,
                        "server stats"
                    );
                }
            })
            .ok();

        // ---- Acceptor -> worker fd pipes ----
        let mut pipe_write_fds = Vec::with_capacity(workers);
        let mut pipe_read_fds = Vec::with_capacity(workers);
        for _ in 0..workers {
            let (read_fd, write_fd) = syscalls::create_pipe()?;
            pipe_read_fds.push(read_fd);
            pipe_write_fds.push(write_fd);
        }

        // ---- Worker threads ----
        let core_ids = core_affinity::get_core_ids().unwrap_or_default();
        let mut handles = Vec::with_capacity(workers);
        info!(
            workers,
            address = %config.address,
            port = config.port,
            "starting workers"
        );

        for i in 0..workers {
            let core_id = core_ids.get(i % core_ids.len().max(1)).copied();
            let mut worker = Worker::new(
                i,
                config.clone(),
                router.clone(),
                self.cache.clone(),
                self.parser.clone(),
                self.handler.clone(),
                worker_metrics[i].clone(),
                pipe_read_fds[i],
            );
            let shutdown_worker = shutdown.clone();

            let handle = thread::Builder::new()
                .name(format!("pyspeed-worker-{}", i))
                .spawn(move || {
                    if let Some(id) = core_id {
                        if core_affinity::set_for_current(id) {
                            info!(worker = i, core = id.id, "worker pinned");
                        }
                    }
                    worker.run(shutdown_worker);
                })?;

            handles.push(handle);
        }

        // ---- Acceptor thread ----
        let host = config.address.clone();
        let port = config.port;
        let shutdown_accept = shutdown.clone();
        let num_workers = workers;

        let acceptor_handle = thread::Builder::new()
            .name("pyspeed-acceptor".to_string())
            .spawn(move || {
                let listen_fd = match syscalls::create_listen_socket(&host, port) {
                    Ok(fd) => fd,
                    Err(e) => {
                        error!(error = %e, "acceptor failed to bind");
                        shutdown_accept.store(true, Ordering::SeqCst);
                        return;
                    }
                };

                info!(%host, port, "accepting connections");

                let epoll = match syscalls::Epoll::new() {
                    Ok(e) => e,
                    Err(e) => {
                        error!(error = %e, "acceptor failed to create event queue");
                        syscalls::close_fd(listen_fd);
                        shutdown_accept.store(true, Ordering::SeqCst);
                        return;
                    }
                };
                if let Err(e) = epoll.add(listen_fd, 0, syscalls::EPOLLIN) {
                    error!(error = %e, "acceptor failed to register listener");
                    syscalls::close_fd(listen_fd);
                    shutdown_accept.store(true, Ordering::SeqCst);
                    return;
                }

                let mut events = vec![syscalls::epoll_event { events: 0, u64: 0 }; 64];
                let mut next_worker: usize = 0;

                while !shutdown_accept.load(Ordering::Acquire) {
                    let n = match epoll.wait(&mut events, 500) {
                        Ok(n) => n,
                        Err(_) => continue,
                    };

                    for _ in 0..n {
                        // Drain the accept queue, fanning out round-robin.
                        loop {
                            match syscalls::accept_connection(listen_fd) {
                                Ok(Some(client_fd)) => {
                                    let target = next_worker % num_workers;
                                    next_worker = next_worker.wrapping_add(1);
                                    if syscalls::send_fd_over_pipe(
                                        pipe_write_fds[target],
                                        client_fd,
                                    )
                                    .is_err()
                                    {
                                        syscalls::close_fd(client_fd);
                                    }
                                }
                                Ok(None) => break,
                                Err(_) => break,
                            }
                        }
                    }
                }

                syscalls::close_fd(listen_fd);
                for fd in &pipe_write_fds {
                    syscalls::close_fd(*fd);
                }
                info!("acceptor exiting");
            })?;

        let _ = acceptor_handle.join();
        for handle in handles {
            let _ = handle.join();
        }

        let total = ServerStats::aggregate(worker_metrics.iter().map(Arc::as_ref));
        info!(
            requests = total.requests_processed,
            bytes_sent = total.bytes_sent,
            bytes_received = total.bytes_received,
            errors = total.errors,
            rps = total.requests_per_second(start_time),
            "server shut down"
        );
        Ok(())
    }
}
