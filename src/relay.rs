/// 双向转发引擎
///
/// 把已经建立好的两条连接（客户端 <-> 目标）接在一起：
/// - 每个方向一个泵，按到达顺序把数据块转发给对端，数据块以所有权转移的方式交给对端
/// - 写失败只记录日志并丢弃该数据块，不会直接拆除连接
/// - 对端已不活跃时，数据块直接释放并记录错误
/// - 任意一端失活后，若对端仍活跃，先把对端未完成的写入刷出，再关闭对端（close-on-flush）
/// - 隧道出站额外有一个一次性状态：客户端的第一个数据块被封装为隧道帧
use crate::protocol::TunnelHeader;
use bytes::{Bytes, BytesMut};
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 数据复制缓冲区大小（64KB 适合高吞吐）
const COPY_BUFFER_SIZE: usize = 65536;

/// 转发对的成帧状态
///
/// `AwaitingFraming` 只会向 `Relaying` 转换一次，不会回退
#[derive(Debug)]
pub enum RelayState {
    /// 等待客户端第一个数据块，用于构造隧道帧
    AwaitingFraming(TunnelHeader),
    /// 原样转发
    Relaying,
}

impl RelayState {
    pub fn is_framing_pending(&self) -> bool {
        matches!(self, RelayState::AwaitingFraming(_))
    }

    /// 处理一个来自客户端的数据块
    ///
    /// 等待成帧时把它封装为隧道帧并切换到 `Relaying`；之后的数据块原样返回
    pub fn prepare(&mut self, chunk: Bytes) -> Bytes {
        match std::mem::replace(self, RelayState::Relaying) {
            RelayState::AwaitingFraming(header) => {
                debug!(
                    "Framing first chunk ({} bytes) for {}:{}",
                    chunk.len(),
                    header.request().host(),
                    header.request().port()
                );
                header.frame(chunk).to_bytes()
            }
            RelayState::Relaying => chunk,
        }
    }
}

/// 转发统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    /// 客户端 -> 目标 的字节数（含隧道帧头）
    pub upstream_bytes: u64,
    /// 目标 -> 客户端 的字节数
    pub downstream_bytes: u64,
    /// 因写失败或对端不活跃而丢弃的数据块数
    pub dropped_chunks: u64,
}

/// 一对连接的转发器
pub struct RelayPair<C, T> {
    client: C,
    target: T,
    state: RelayState,
    initial: Option<Bytes>,
    idle_timeout: Option<Duration>,
    label: String,
}

impl<C, T> RelayPair<C, T>
where
    C: AsyncRead + AsyncWrite + Unpin + Send,
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(client: C, target: T, state: RelayState) -> Self {
        Self {
            client,
            target,
            state,
            initial: None,
            idle_timeout: None,
            label: "relay".to_string(),
        }
    }

    /// 在读取客户端之前先转发的数据（例如 HTTP 请求头之后已缓冲的字节）
    ///
    /// 它按客户端的第一个数据块处理，因此同样会经过成帧
    pub fn with_initial(mut self, chunk: Bytes) -> Self {
        if !chunk.is_empty() {
            self.initial = Some(chunk);
        }
        self
    }

    /// 两个方向都没有数据超过该时长时结束转发
    pub fn with_idle_timeout(mut self, idle_timeout: Option<Duration>) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn is_framing_pending(&self) -> bool {
        self.state.is_framing_pending()
    }

    /// 运行直到两端都结束
    pub async fn run(self) -> RelayStats {
        let (client_read, client_write) = tokio::io::split(self.client);
        let (target_read, target_write) = tokio::io::split(self.target);

        let client_side = Side::new("client");
        let target_side = Side::new("target");
        let activity = Activity::new();

        let upstream = Pump {
            label: &self.label,
            reader: client_read,
            writer: target_write,
            source: client_side.clone(),
            peer: target_side.clone(),
            state: self.state,
            idle_timeout: self.idle_timeout,
            activity: &activity,
        };
        let downstream = Pump {
            label: &self.label,
            reader: target_read,
            writer: client_write,
            source: target_side,
            peer: client_side,
            state: RelayState::Relaying,
            idle_timeout: self.idle_timeout,
            activity: &activity,
        };

        let (up, down) = tokio::join!(upstream.run(self.initial), downstream.run(None));

        let stats = RelayStats {
            upstream_bytes: up.bytes,
            downstream_bytes: down.bytes,
            dropped_chunks: up.dropped + down.dropped,
        };
        debug!("[{}] relay finished: {:?}", self.label, stats);
        stats
    }
}

/// 连接一端的活跃状态；取消即表示该端已失活
#[derive(Clone)]
struct Side {
    name: &'static str,
    closed: CancellationToken,
}

impl Side {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            closed: CancellationToken::new(),
        }
    }

    fn is_active(&self) -> bool {
        !self.closed.is_cancelled()
    }
}

/// 转发对最近一次成功转发的时间
struct Activity {
    start: Instant,
    last_ms: AtomicU64,
}

impl Activity {
    fn new() -> Self {
        Self {
            start: Instant::now(),
            last_ms: AtomicU64::new(0),
        }
    }

    fn touch(&self) {
        let now = self.start.elapsed().as_millis() as u64;
        self.last_ms.store(now, Ordering::Relaxed);
    }

    fn idle_for(&self) -> Duration {
        let last = Duration::from_millis(self.last_ms.load(Ordering::Relaxed));
        self.start.elapsed().saturating_sub(last)
    }
}

#[derive(Debug, Default)]
struct PumpStats {
    bytes: u64,
    dropped: u64,
}

/// 单方向的转发泵：source 读 -> peer 写
struct Pump<'a, R, W> {
    label: &'a str,
    reader: R,
    writer: W,
    source: Side,
    peer: Side,
    state: RelayState,
    idle_timeout: Option<Duration>,
    activity: &'a Activity,
}

impl<R, W> Pump<'_, R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    async fn run(mut self, initial: Option<Bytes>) -> PumpStats {
        let mut stats = PumpStats::default();

        // 激活时先做一次空 flush，让对端尽早进入可写状态
        if let Err(e) = self.writer.flush().await {
            debug!("[{}] initial flush to {} failed: {}", self.label, self.peer.name, e);
        }

        if let Some(chunk) = initial {
            let chunk = self.state.prepare(chunk);
            self.forward(chunk, &mut stats).await;
        }

        let source_closed = self.source.closed.clone();
        let mut buf = BytesMut::with_capacity(COPY_BUFFER_SIZE);
        loop {
            buf.reserve(COPY_BUFFER_SIZE);

            let read = tokio::select! {
                biased;
                _ = source_closed.cancelled() => break,
                read = self.read_chunk(&mut buf) => read,
            };

            match read {
                Ok(0) => {
                    debug!("[{}] {} reached EOF", self.label, self.source.name);
                    break;
                }
                Ok(_) => {
                    let chunk = self.state.prepare(buf.split().freeze());
                    self.forward(chunk, &mut stats).await;
                }
                Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                    info!("[{}] relay idle timeout, closing", self.label);
                    break;
                }
                Err(e) => {
                    warn!("[{}] read from {} failed: {}", self.label, self.source.name, e);
                    break;
                }
            }
        }

        self.source.closed.cancel();
        if self.peer.is_active() {
            close_on_flush(&mut self.writer, self.label, self.peer.name).await;
            self.peer.closed.cancel();
        } else if let Err(e) = self.writer.shutdown().await {
            // 对端已自行结束，仍然关闭写方向，让它完成正常的关闭流程
            debug!("[{}] closing ended {} failed: {}", self.label, self.peer.name, e);
        }

        stats
    }

    /// 读取一个数据块；配置了空闲超时时，只有两个方向都空闲才返回 TimedOut
    async fn read_chunk(&mut self, buf: &mut BytesMut) -> io::Result<usize> {
        let Some(limit) = self.idle_timeout else {
            return self.reader.read_buf(buf).await;
        };

        loop {
            match tokio::time::timeout(limit, self.reader.read_buf(buf)).await {
                Ok(result) => return result,
                Err(_) if self.activity.idle_for() >= limit => {
                    return Err(io::Error::new(io::ErrorKind::TimedOut, "relay idle timeout"));
                }
                Err(_) => continue,
            }
        }
    }

    async fn forward(&mut self, chunk: Bytes, stats: &mut PumpStats) {
        if !self.peer.is_active() {
            error!(
                "[{}] {} is not active, releasing {} bytes",
                self.label,
                self.peer.name,
                chunk.len()
            );
            stats.dropped += 1;
            return;
        }

        let len = chunk.len();
        let result = async {
            self.writer.write_all(&chunk).await?;
            self.writer.flush().await
        }
        .await;

        match result {
            Ok(()) => {
                stats.bytes += len as u64;
                self.activity.touch();
            }
            Err(e) => {
                error!(
                    "[{}] write of {} bytes to {} failed: {}",
                    self.label, len, self.peer.name, e
                );
                stats.dropped += 1;
            }
        }
    }
}

/// 刷出所有已排队的写入后关闭写端
async fn close_on_flush<W>(writer: &mut W, label: &str, name: &str)
where
    W: AsyncWrite + Unpin,
{
    if let Err(e) = writer.flush().await {
        debug!("[{}] flush before closing {} failed: {}", label, name, e);
    }
    if let Err(e) = writer.shutdown().await {
        debug!("[{}] closing {} failed: {}", label, name, e);
    }
}
