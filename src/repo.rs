use async_trait::async_trait;

use crate::models::*;
use crate::record::{Filter, Insert, Record};

#[derive(thiserror::Error, Debug)]
pub enum RepoError {
    #[error("not found")] NotFound,
    #[error("forbidden")] Forbidden,
    #[error("duplicate key")] DuplicateKey,
    #[error("unknown column: {0}")] UnknownColumn(&'static str),
    #[error("validation: {0}")] Validation(&'static str),
    #[error("internal: {0}")] Internal(String),
}

pub type RepoResult<T> = Result<T, RepoError>;

impl From<sqlx::Error> for RepoError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::RowNotFound => return RepoError::NotFound,
            sqlx::Error::Database(db) => match db.code().as_deref() {
                Some("23505") => return RepoError::DuplicateKey, // unique_violation
                Some("23503") => return RepoError::NotFound,     // foreign_key_violation
                _ => {}
            },
            _ => {}
        }
        RepoError::Internal(e.to_string())
    }
}

/// Whether a post lookup must also verify ownership.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorCheck {
    Skip,
    Enforce(Id),
}

/// The one ownership predicate for post mutation. Callers check existence
/// first, so a missing post is always `NotFound`, never `Forbidden`.
pub fn assert_owner(post: &Post, acting_user: Id) -> RepoResult<()> {
    if post.author.key() != acting_user {
        return Err(RepoError::Forbidden);
    }
    Ok(())
}

#[async_trait]
pub trait UserRepo: Send + Sync {
    /// Fails with `DuplicateKey` when the username is taken.
    async fn create_user(&self, new: NewUser) -> RepoResult<User>;
    async fn get_user(&self, filter: Filter) -> RepoResult<Option<User>>;
    async fn list_users(&self, filter: Filter) -> RepoResult<Vec<User>>;

    /// `NotFound` for an unknown username, `Forbidden` for a bad password.
    async fn authenticate(&self, username: &str, raw_password: &str) -> RepoResult<User> {
        let user = self
            .get_user(Filter::new().eq("username", username))
            .await?
            .ok_or(RepoError::NotFound)?;
        if !user.verify_password(raw_password) {
            return Err(RepoError::Forbidden);
        }
        Ok(user)
    }
}

#[async_trait]
pub trait PostRepo: Send + Sync {
    async fn create_post(&self, new: NewPost) -> RepoResult<Post>;
    /// The single gate for post access: `NotFound` when the row is missing,
    /// then `Forbidden` when `Enforce` names someone other than the author.
    async fn get_post(&self, id: Id, check: AuthorCheck) -> RepoResult<Post>;
    /// All posts, newest first.
    async fn list_posts(&self) -> RepoResult<Vec<Post>>;
    async fn update_post(&self, id: Id, upd: UpdatePost, acting_user: Id) -> RepoResult<Post>;
    /// Likes and replies are left behind; there is no cascade.
    async fn delete_post(&self, id: Id, acting_user: Id) -> RepoResult<()>;
}

#[async_trait]
pub trait LikeRepo: Send + Sync {
    /// Row insert plus counter bump in one transaction; `DuplicateKey` when
    /// the (post, user) pair already has a like.
    async fn create_like(&self, new: NewLike) -> RepoResult<Like>;
    /// Row delete plus counter drop in one transaction; `NotFound` when the
    /// pair has no like.
    async fn delete_like(&self, post_id: Id, user_id: Id) -> RepoResult<()>;
    /// Flip the like state for (post, user) and report the new counter.
    async fn toggle_like(&self, post_id: Id, user_id: Id) -> RepoResult<LikeState>;
    async fn list_likes(&self, filter: Filter) -> RepoResult<Vec<Like>>;
}

#[async_trait]
pub trait ReplyRepo: Send + Sync {
    async fn create_reply(&self, new: NewReply) -> RepoResult<Reply>;
    /// Oldest first.
    async fn list_replies(&self, filter: Filter) -> RepoResult<Vec<Reply>>;
}

pub trait Repo: UserRepo + PostRepo + LikeRepo + ReplyRepo {}

impl<T> Repo for T where T: UserRepo + PostRepo + LikeRepo + ReplyRepo {}

#[cfg(feature = "inmem-store")]
pub mod inmem {
    use super::*;
    use chrono::Utc;
    use serde::{Deserialize, Serialize};
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};
    use std::sync::{Arc, RwLock};
    use tracing::{debug, warn};

    const SNAPSHOT_PATH: &str = "data/state.json";

    #[derive(Default, Serialize, Deserialize)]
    pub struct State {
        users: HashMap<Id, User>,
        posts: HashMap<Id, Post>,
        likes: HashMap<Id, Like>,
        replies: HashMap<Id, Reply>,
        next_id: Id,
    }

    /// Ties a row type to its table in [`State`], so the generic engine can
    /// run the same filters the SQL backend does.
    pub trait InMemTable: Record + Serialize + Clone {
        fn rows(state: &State) -> &HashMap<Id, Self>;
    }

    impl InMemTable for User {
        fn rows(state: &State) -> &HashMap<Id, Self> {
            &state.users
        }
    }

    impl InMemTable for Post {
        fn rows(state: &State) -> &HashMap<Id, Self> {
            &state.posts
        }
    }

    impl InMemTable for Like {
        fn rows(state: &State) -> &HashMap<Id, Self> {
            &state.likes
        }
    }

    impl InMemTable for Reply {
        fn rows(state: &State) -> &HashMap<Id, Self> {
            &state.replies
        }
    }

    #[derive(Clone)]
    pub struct InMemRepo {
        state: Arc<RwLock<State>>,
        snapshot_path: Arc<PathBuf>,
    }

    impl InMemRepo {
        fn data_dir() -> PathBuf {
            std::env::var("RBLOG_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("data"))
        }

        fn snapshot_path() -> PathBuf {
            if std::env::var("RBLOG_DATA_DIR").is_ok() {
                let mut p = Self::data_dir();
                p.push("state.json");
                p
            } else {
                PathBuf::from(SNAPSHOT_PATH)
            }
        }

        fn load_state_from(path: &Path) -> State {
            match std::fs::read(path) {
                Ok(bytes) => match serde_json::from_slice::<State>(&bytes) {
                    Ok(s) => {
                        debug!(path = %path.display(), "loaded snapshot");
                        s
                    }
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "unreadable snapshot, starting empty");
                        State::default()
                    }
                },
                Err(_) => State::default(),
            }
        }

        fn persist(&self) {
            let path = self.snapshot_path.clone();
            if let Ok(s) = serde_json::to_vec_pretty(&*self.state.read().unwrap()) {
                if let Some(dir) = path.parent() {
                    let _ = std::fs::create_dir_all(dir);
                }
                if let Err(e) = std::fs::write(&*path, s) {
                    warn!(path = %path.display(), error = %e, "failed to write snapshot");
                }
            }
        }

        pub fn new() -> Self {
            Self::with_snapshot(Self::snapshot_path())
        }

        /// Back the repository by an explicit snapshot file; tests point this
        /// at a temp directory to isolate state.
        pub fn with_snapshot(snapshot_path: PathBuf) -> Self {
            let state = Self::load_state_from(&snapshot_path);
            Self {
                state: Arc::new(RwLock::new(state)),
                snapshot_path: Arc::new(snapshot_path),
            }
        }

        fn next_id(state: &mut State) -> Id {
            state.next_id += 1;
            state.next_id
        }

        // ---- generic record engine ----

        /// Single-row equality lookup; absence is not an error.
        pub fn find<T: InMemTable>(&self, filter: Filter) -> RepoResult<Option<T>> {
            filter.validate::<T>()?;
            let s = self.state.read().unwrap();
            Ok(T::rows(&s).values().find(|row| filter.matches(*row)).cloned())
        }

        /// All rows matching the filter, store order.
        pub fn filter<T: InMemTable>(&self, filter: Filter) -> RepoResult<Vec<T>> {
            filter.validate::<T>()?;
            let s = self.state.read().unwrap();
            Ok(T::rows(&s)
                .values()
                .filter(|row| filter.matches(*row))
                .cloned()
                .collect())
        }

        pub fn find_all<T: InMemTable>(&self) -> RepoResult<Vec<T>> {
            self.filter(Filter::new())
        }

        /// Whether the row's id still exists in the store; catches instances
        /// whose row was deleted elsewhere.
        pub fn is_saved<T: InMemTable>(&self, row: &T) -> bool {
            let s = self.state.read().unwrap();
            T::rows(&s).contains_key(&row.id())
        }
    }

    impl Default for InMemRepo {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl UserRepo for InMemRepo {
        async fn create_user(&self, new: NewUser) -> RepoResult<User> {
            new.validate()?;
            let mut s = self.state.write().unwrap();
            if s.users.values().any(|u| u.username == new.username) {
                return Err(RepoError::DuplicateKey);
            }
            let id = Self::next_id(&mut s);
            let user = User {
                id,
                username: new.username,
                password_hash: new.password_hash,
            };
            s.users.insert(id, user.clone());
            drop(s);
            self.persist();
            Ok(user)
        }

        async fn get_user(&self, filter: Filter) -> RepoResult<Option<User>> {
            self.find(filter)
        }

        async fn list_users(&self, filter: Filter) -> RepoResult<Vec<User>> {
            self.filter(filter)
        }
    }

    #[async_trait]
    impl PostRepo for InMemRepo {
        async fn create_post(&self, new: NewPost) -> RepoResult<Post> {
            new.validate()?;
            let author_id = new.author.key();
            let mut s = self.state.write().unwrap();
            if !s.users.contains_key(&author_id) {
                return Err(RepoError::NotFound);
            }
            let id = Self::next_id(&mut s);
            let post = Post {
                id,
                author: Lazy::Key(author_id),
                title: new.title,
                body: new.body,
                like_count: 0,
                created: Utc::now(),
            };
            s.posts.insert(id, post.clone());
            drop(s);
            self.persist();
            Ok(post)
        }

        async fn get_post(&self, id: Id, check: AuthorCheck) -> RepoResult<Post> {
            let post = self
                .find::<Post>(Filter::new().eq("id", id))?
                .ok_or(RepoError::NotFound)?;
            if let AuthorCheck::Enforce(acting_user) = check {
                assert_owner(&post, acting_user)?;
            }
            Ok(post)
        }

        async fn list_posts(&self) -> RepoResult<Vec<Post>> {
            let mut v = self.find_all::<Post>()?;
            v.sort_by(|a, b| b.created.cmp(&a.created).then(b.id.cmp(&a.id)));
            Ok(v)
        }

        async fn update_post(&self, id: Id, upd: UpdatePost, acting_user: Id) -> RepoResult<Post> {
            if let Some(title) = &upd.title {
                if title.trim().is_empty() {
                    return Err(RepoError::Validation("title must not be empty"));
                }
            }
            self.get_post(id, AuthorCheck::Enforce(acting_user)).await?;

            let mut s = self.state.write().unwrap();
            let post = s.posts.get_mut(&id).ok_or(RepoError::NotFound)?;
            if let Some(title) = upd.title {
                post.title = title;
            }
            if let Some(body) = upd.body {
                post.body = body;
            }
            let updated = post.clone();
            drop(s);
            self.persist();
            Ok(updated)
        }

        async fn delete_post(&self, id: Id, acting_user: Id) -> RepoResult<()> {
            self.get_post(id, AuthorCheck::Enforce(acting_user)).await?;
            let mut s = self.state.write().unwrap();
            s.posts.remove(&id);
            // likes and replies stay behind as orphans
            drop(s);
            self.persist();
            Ok(())
        }
    }

    #[async_trait]
    impl LikeRepo for InMemRepo {
        async fn create_like(&self, new: NewLike) -> RepoResult<Like> {
            new.validate()?;
            let post_id = new.post.key();
            let user_id = new.user.key();
            let mut s = self.state.write().unwrap();
            if !s.posts.contains_key(&post_id) || !s.users.contains_key(&user_id) {
                return Err(RepoError::NotFound);
            }
            if s.likes
                .values()
                .any(|l| l.post.key() == post_id && l.user.key() == user_id)
            {
                return Err(RepoError::DuplicateKey);
            }
            let id = Self::next_id(&mut s);
            let like = Like {
                id,
                post: Lazy::Key(post_id),
                user: Lazy::Key(user_id),
                created: Utc::now(),
            };
            s.likes.insert(id, like.clone());
            if let Some(post) = s.posts.get_mut(&post_id) {
                post.like_count += 1;
            }
            drop(s);
            self.persist();
            Ok(like)
        }

        async fn delete_like(&self, post_id: Id, user_id: Id) -> RepoResult<()> {
            let mut s = self.state.write().unwrap();
            let like_id = s
                .likes
                .iter()
                .find(|(_, l)| l.post.key() == post_id && l.user.key() == user_id)
                .map(|(id, _)| *id)
                .ok_or(RepoError::NotFound)?;
            s.likes.remove(&like_id);
            // the post may be gone already (orphaned like); skip the counter then
            if let Some(post) = s.posts.get_mut(&post_id) {
                post.like_count -= 1;
            }
            drop(s);
            self.persist();
            Ok(())
        }

        async fn toggle_like(&self, post_id: Id, user_id: Id) -> RepoResult<LikeState> {
            let mut s = self.state.write().unwrap();
            if !s.posts.contains_key(&post_id) || !s.users.contains_key(&user_id) {
                return Err(RepoError::NotFound);
            }
            let existing = s
                .likes
                .iter()
                .find(|(_, l)| l.post.key() == post_id && l.user.key() == user_id)
                .map(|(id, _)| *id);
            let liked = match existing {
                Some(like_id) => {
                    s.likes.remove(&like_id);
                    false
                }
                None => {
                    let id = Self::next_id(&mut s);
                    let like = Like {
                        id,
                        post: Lazy::Key(post_id),
                        user: Lazy::Key(user_id),
                        created: Utc::now(),
                    };
                    s.likes.insert(id, like);
                    true
                }
            };
            let like_count = match s.posts.get_mut(&post_id) {
                Some(post) => {
                    post.like_count += if liked { 1 } else { -1 };
                    post.like_count
                }
                None => return Err(RepoError::NotFound),
            };
            drop(s);
            self.persist();
            Ok(LikeState { liked, like_count })
        }

        async fn list_likes(&self, filter: Filter) -> RepoResult<Vec<Like>> {
            self.filter(filter)
        }
    }

    #[async_trait]
    impl ReplyRepo for InMemRepo {
        async fn create_reply(&self, new: NewReply) -> RepoResult<Reply> {
            new.validate()?;
            let post_id = new.post.key();
            let user_id = new.user.key();
            let mut s = self.state.write().unwrap();
            if !s.posts.contains_key(&post_id) || !s.users.contains_key(&user_id) {
                return Err(RepoError::NotFound);
            }
            let id = Self::next_id(&mut s);
            let reply = Reply {
                id,
                post: Lazy::Key(post_id),
                user: Lazy::Key(user_id),
                body: new.body,
                created: Utc::now(),
            };
            s.replies.insert(id, reply.clone());
            drop(s);
            self.persist();
            Ok(reply)
        }

        async fn list_replies(&self, filter: Filter) -> RepoResult<Vec<Reply>> {
            let mut v = self.filter::<Reply>(filter)?;
            v.sort_by(|a, b| a.created.cmp(&b.created).then(a.id.cmp(&b.id)));
            Ok(v)
        }
    }
}

// Postgres implementation (feature = "postgres-store")
#[cfg(feature = "postgres-store")]
pub mod pg {
    use super::*;
    use crate::record::ColumnValue;
    use sqlx::postgres::{PgPoolOptions, PgRow};
    use sqlx::{PgPool, Postgres, QueryBuilder};
    use tracing::info;

    /// Pool with lazily opened physical connections: the first statement on a
    /// handle opens one, and every handle returns to the pool on drop, on
    /// every exit path.
    pub fn connect(database_url: &str) -> RepoResult<PgPool> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect_lazy(database_url)?;
        Ok(pool)
    }

    pub fn connect_from_env() -> RepoResult<PgPool> {
        if cfg!(debug_assertions) {
            let _ = dotenv::dotenv();
        }
        let url = std::env::var("DATABASE_URL")
            .map_err(|_| RepoError::Internal("DATABASE_URL must be set".into()))?;
        connect(&url)
    }

    pub async fn migrate(pool: &PgPool) -> RepoResult<()> {
        sqlx::migrate!("./migrations")
            .run(pool)
            .await
            .map_err(|e| RepoError::Internal(e.to_string()))?;
        info!("database migrations complete");
        Ok(())
    }

    /// `SELECT * FROM <table> WHERE ...` from a validated filter. Column
    /// names come from the static descriptors, never from caller strings.
    fn select_query<T: Record>(filter: &Filter) -> QueryBuilder<'static, Postgres> {
        let mut qb = QueryBuilder::new(format!("SELECT * FROM {}", T::TABLE));
        let mut first = true;
        for (column, value) in filter.clauses() {
            qb.push(if first { " WHERE " } else { " AND " });
            first = false;
            qb.push(*column);
            qb.push(" = ");
            match value {
                ColumnValue::Int(v) => qb.push_bind(*v),
                ColumnValue::Text(v) => qb.push_bind(v.clone()),
            };
        }
        if let Some(order) = T::ORDER_BY {
            qb.push(" ORDER BY ");
            qb.push(order);
        }
        qb
    }

    #[derive(Clone)]
    pub struct PgRepo {
        pool: PgPool,
    }

    impl PgRepo {
        pub fn new(pool: PgPool) -> Self {
            Self { pool }
        }

        // ---- generic record engine ----

        /// Single-row equality lookup; absence is not an error.
        pub async fn find<T>(&self, filter: Filter) -> RepoResult<Option<T>>
        where
            T: Record + for<'r> sqlx::FromRow<'r, PgRow> + Send + Unpin,
        {
            filter.validate::<T>()?;
            let mut qb = select_query::<T>(&filter);
            Ok(qb.build_query_as::<T>().fetch_optional(&self.pool).await?)
        }

        /// All rows matching the filter, in the entity's listing order when
        /// it defines one.
        pub async fn filter<T>(&self, filter: Filter) -> RepoResult<Vec<T>>
        where
            T: Record + for<'r> sqlx::FromRow<'r, PgRow> + Send + Unpin,
        {
            filter.validate::<T>()?;
            let mut qb = select_query::<T>(&filter);
            Ok(qb.build_query_as::<T>().fetch_all(&self.pool).await?)
        }

        pub async fn find_all<T>(&self) -> RepoResult<Vec<T>>
        where
            T: Record + for<'r> sqlx::FromRow<'r, PgRow> + Send + Unpin,
        {
            self.filter(Filter::new()).await
        }

        /// Insert one row and hand back the canonical re-fetched instance, so
        /// server-assigned columns (id, created, defaults) come back populated.
        pub async fn insert<N>(&self, new: &N) -> RepoResult<N::Output>
        where
            N: Insert,
            N::Output: Record + for<'r> sqlx::FromRow<'r, PgRow> + Send + Unpin,
        {
            new.validate()?;
            let mut qb =
                QueryBuilder::<Postgres>::new(format!("INSERT INTO {} (", N::Output::TABLE));
            let mut cols = qb.separated(", ");
            for column in N::COLUMNS {
                cols.push(*column);
            }
            qb.push(") VALUES (");
            let mut binds = qb.separated(", ");
            for value in new.values() {
                match value {
                    ColumnValue::Int(v) => binds.push_bind(v),
                    ColumnValue::Text(v) => binds.push_bind(v),
                };
            }
            qb.push(") RETURNING id");
            let id: Id = qb.build_query_scalar().fetch_one(&self.pool).await?;
            self.find(Filter::new().eq("id", id))
                .await?
                .ok_or_else(|| RepoError::Internal("row missing after insert".into()))
        }

        /// Whether the row's id still exists in the store; catches instances
        /// whose row was deleted elsewhere.
        pub async fn is_saved<T: Record>(&self, row: &T) -> RepoResult<bool> {
            let sql = format!("SELECT EXISTS(SELECT 1 FROM {} WHERE id = $1)", T::TABLE);
            let exists: bool = sqlx::query_scalar(&sql)
                .bind(row.id())
                .fetch_one(&self.pool)
                .await?;
            Ok(exists)
        }
    }

    #[async_trait]
    impl UserRepo for PgRepo {
        async fn create_user(&self, new: NewUser) -> RepoResult<User> {
            self.insert(&new).await
        }

        async fn get_user(&self, filter: Filter) -> RepoResult<Option<User>> {
            self.find(filter).await
        }

        async fn list_users(&self, filter: Filter) -> RepoResult<Vec<User>> {
            self.filter(filter).await
        }
    }

    #[async_trait]
    impl PostRepo for PgRepo {
        async fn create_post(&self, new: NewPost) -> RepoResult<Post> {
            // a dangling author id trips the foreign key and maps to NotFound
            self.insert(&new).await
        }

        async fn get_post(&self, id: Id, check: AuthorCheck) -> RepoResult<Post> {
            let post = self
                .find::<Post>(Filter::new().eq("id", id))
                .await?
                .ok_or(RepoError::NotFound)?;
            if let AuthorCheck::Enforce(acting_user) = check {
                assert_owner(&post, acting_user)?;
            }
            Ok(post)
        }

        async fn list_posts(&self) -> RepoResult<Vec<Post>> {
            self.find_all().await
        }

        async fn update_post(&self, id: Id, upd: UpdatePost, acting_user: Id) -> RepoResult<Post> {
            if let Some(title) = &upd.title {
                if title.trim().is_empty() {
                    return Err(RepoError::Validation("title must not be empty"));
                }
            }
            self.get_post(id, AuthorCheck::Enforce(acting_user)).await?;

            sqlx::query(
                "UPDATE posts SET title = COALESCE($2, title), body = COALESCE($3, body) WHERE id = $1",
            )
            .bind(id)
            .bind(upd.title)
            .bind(upd.body)
            .execute(&self.pool)
            .await?;
            self.get_post(id, AuthorCheck::Skip).await
        }

        async fn delete_post(&self, id: Id, acting_user: Id) -> RepoResult<()> {
            self.get_post(id, AuthorCheck::Enforce(acting_user)).await?;
            // likes and replies stay behind as orphans
            sqlx::query("DELETE FROM posts WHERE id = $1")
                .bind(id)
                .execute(&self.pool)
                .await?;
            Ok(())
        }
    }

    #[async_trait]
    impl LikeRepo for PgRepo {
        async fn create_like(&self, new: NewLike) -> RepoResult<Like> {
            new.validate()?;
            let post_id = new.post.key();
            let user_id = new.user.key();
            let mut tx = self.pool.begin().await?;
            // the counter bump doubles as the post existence check
            sqlx::query_scalar::<_, i32>(
                "UPDATE posts SET like_count = like_count + 1 WHERE id = $1 RETURNING like_count",
            )
            .bind(post_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(RepoError::NotFound)?;
            let id: Id = sqlx::query_scalar(
                "INSERT INTO likes (post_id, user_id) VALUES ($1, $2) RETURNING id",
            )
            .bind(post_id)
            .bind(user_id)
            .fetch_one(&mut *tx)
            .await?;
            tx.commit().await?;
            self.find(Filter::new().eq("id", id))
                .await?
                .ok_or_else(|| RepoError::Internal("row missing after insert".into()))
        }

        async fn delete_like(&self, post_id: Id, user_id: Id) -> RepoResult<()> {
            let mut tx = self.pool.begin().await?;
            let res = sqlx::query("DELETE FROM likes WHERE post_id = $1 AND user_id = $2")
                .bind(post_id)
                .bind(user_id)
                .execute(&mut *tx)
                .await?;
            if res.rows_affected() == 0 {
                return Err(RepoError::NotFound);
            }
            // no counter row to touch when the like outlived its post
            sqlx::query("UPDATE posts SET like_count = like_count - 1 WHERE id = $1")
                .bind(post_id)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            Ok(())
        }

        async fn toggle_like(&self, post_id: Id, user_id: Id) -> RepoResult<LikeState> {
            let mut tx = self.pool.begin().await?;
            let existing: Option<Id> =
                sqlx::query_scalar("SELECT id FROM likes WHERE post_id = $1 AND user_id = $2")
                    .bind(post_id)
                    .bind(user_id)
                    .fetch_optional(&mut *tx)
                    .await?;
            let (liked, delta) = match existing {
                Some(like_id) => {
                    sqlx::query("DELETE FROM likes WHERE id = $1")
                        .bind(like_id)
                        .execute(&mut *tx)
                        .await?;
                    (false, -1i32)
                }
                None => {
                    sqlx::query("INSERT INTO likes (post_id, user_id) VALUES ($1, $2)")
                        .bind(post_id)
                        .bind(user_id)
                        .execute(&mut *tx)
                        .await?;
                    (true, 1i32)
                }
            };
            // the counter update doubles as the post existence check; a miss
            // rolls the whole toggle back
            let like_count: i32 = sqlx::query_scalar(
                "UPDATE posts SET like_count = like_count + $2 WHERE id = $1 RETURNING like_count",
            )
            .bind(post_id)
            .bind(delta)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(RepoError::NotFound)?;
            tx.commit().await?;
            Ok(LikeState { liked, like_count })
        }

        async fn list_likes(&self, filter: Filter) -> RepoResult<Vec<Like>> {
            self.filter(filter).await
        }
    }

    #[async_trait]
    impl ReplyRepo for PgRepo {
        async fn create_reply(&self, new: NewReply) -> RepoResult<Reply> {
            new.validate()?;
            // replies carry no foreign key on post_id, so check it by hand
            let post_exists: bool =
                sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM posts WHERE id = $1)")
                    .bind(new.post.key())
                    .fetch_one(&self.pool)
                    .await?;
            if !post_exists {
                return Err(RepoError::NotFound);
            }
            self.insert(&new).await
        }

        async fn list_replies(&self, filter: Filter) -> RepoResult<Vec<Reply>> {
            self.filter(filter).await
        }
    }
}
