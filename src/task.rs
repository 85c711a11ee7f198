use crate::types::{BoxError, PoolId, UserContext};
use derive_more::Display;

/// One of the four independent leaf fetches.
#[derive(Debug, Display, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FetchKind {
    #[display("posts")]
    Posts,
    #[display("comments")]
    Comments,
    #[display("albums")]
    Albums,
    #[display("photos")]
    Photos,
}

impl FetchKind {
    /// All leaves, in program order.
    pub const ALL: [Self; 4] = [Self::Posts, Self::Comments, Self::Albums, Self::Photos];

    /// Position of this leaf in `ALL`.
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// The join that consumes this leaf.
    #[must_use]
    pub const fn consumer(self) -> JoinKind {
        match self {
            Self::Posts | Self::Comments => JoinKind::PostsAndComments,
            Self::Albums | Self::Photos => JoinKind::AlbumsAndPhotos,
        }
    }
}

/// One of the two mid-level joins.
#[derive(Debug, Display, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum JoinKind {
    #[display("posts+comments")]
    PostsAndComments,
    #[display("albums+photos")]
    AlbumsAndPhotos,
}

impl JoinKind {
    /// Both joins, in the order their results are concatenated.
    pub const ALL: [Self; 2] = [Self::PostsAndComments, Self::AlbumsAndPhotos];

    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// The `(left, right)` leaves this join combines.
    #[must_use]
    pub const fn inputs(self) -> (FetchKind, FetchKind) {
        match self {
            Self::PostsAndComments => (FetchKind::Posts, FetchKind::Comments),
            Self::AlbumsAndPhotos => (FetchKind::Albums, FetchKind::Photos),
        }
    }
}

/// A node of the fixed graph: four fetches, two joins, one final join.
#[derive(Debug, Display, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Stage {
    #[display("fetch({_0})")]
    Fetch(FetchKind),
    #[display("join({_0})")]
    Join(JoinKind),
    #[display("final")]
    Final,
}

/// Opaque leaf operation.
///
/// Called concurrently from several pool threads, each time with a different
/// `FetchKind`.
pub trait Fetch: Send + Sync + 'static {
    /// # Errors
    /// Any error ends the invocation with `OrchestrationError::Fetch`.
    fn fetch(&self, kind: FetchKind) -> Result<String, BoxError>;
}

impl<F> Fetch for F
where
    F: Fn(FetchKind) -> Result<String, BoxError> + Send + Sync + 'static,
{
    fn fetch(&self, kind: FetchKind) -> Result<String, BoxError> {
        self(kind)
    }
}

/// Combines the two completed leaves of a join into a derived string.
///
/// `left` and `right` are the payloads of `kind.inputs()`, handed over by
/// value: each leaf is consumed by exactly one join.
pub trait Combine: Send + Sync + 'static {
    /// # Errors
    /// Any error ends the invocation with `OrchestrationError::Combine`.
    fn combine(
        &self,
        kind: JoinKind,
        ctx: UserContext,
        left: String,
        right: String,
    ) -> Result<String, BoxError>;
}

impl<F> Combine for F
where
    F: Fn(JoinKind, UserContext, String, String) -> Result<String, BoxError>
        + Send
        + Sync
        + 'static,
{
    fn combine(
        &self,
        kind: JoinKind,
        ctx: UserContext,
        left: String,
        right: String,
    ) -> Result<String, BoxError> {
        self(kind, ctx, left, right)
    }
}

/// Hook notified as each stage starts running.
pub trait StageObserver: Send + Sync + 'static {
    /// `pool` is the pool whose thread is executing `stage`.
    fn on_stage(&self, stage: Stage, pool: PoolId);
}

impl<F> StageObserver for F
where
    F: Fn(Stage, PoolId) + Send + Sync + 'static,
{
    fn on_stage(&self, stage: Stage, pool: PoolId) {
        self(stage, pool);
    }
}
