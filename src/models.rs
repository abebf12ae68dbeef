use std::future::Future;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::Row;

use crate::password;
use crate::record::{ColumnValue, Filter, Insert, Record};
use crate::repo::{AuthorCheck, LikeRepo, PostRepo, ReplyRepo, RepoError, RepoResult, UserRepo};

pub type Id = i64;

/// A relationship field: either the bare foreign key or the referenced row,
/// loaded on first access and cached on the instance from then on.
///
/// Serializes untagged, so an unresolved reference round-trips as a plain id
/// under its column name.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Lazy<T> {
    Key(Id),
    Loaded(Box<T>),
}

impl<T: Record> Lazy<T> {
    /// The foreign key, whether or not the row has been loaded.
    pub fn key(&self) -> Id {
        match self {
            Lazy::Key(id) => *id,
            Lazy::Loaded(row) => row.id(),
        }
    }

    pub fn loaded(&self) -> Option<&T> {
        match self {
            Lazy::Key(_) => None,
            Lazy::Loaded(row) => Some(row),
        }
    }

    /// Load the referenced row once and replace the key tag in place.
    pub async fn resolve_with<F, Fut>(&mut self, load: F) -> RepoResult<&T>
    where
        F: FnOnce(Id) -> Fut,
        Fut: Future<Output = RepoResult<T>>,
    {
        if let Lazy::Key(id) = *self {
            *self = Lazy::Loaded(Box::new(load(id).await?));
        }
        match self {
            Lazy::Loaded(row) => Ok(row),
            Lazy::Key(_) => unreachable!("reference resolved above"),
        }
    }
}

impl<T> From<Id> for Lazy<T> {
    fn from(id: Id) -> Self {
        Lazy::Key(id)
    }
}

impl From<User> for Lazy<User> {
    fn from(user: User) -> Self {
        Lazy::Loaded(Box::new(user))
    }
}

impl From<Post> for Lazy<Post> {
    fn from(post: Post) -> Self {
        Lazy::Loaded(Box::new(post))
    }
}

// ---------------- User ----------------

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: Id,
    pub username: String,
    pub password_hash: String,
}

impl User {
    pub fn verify_password(&self, raw_password: &str) -> bool {
        password::verify(raw_password, &self.password_hash)
    }
}

impl Record for User {
    const TABLE: &'static str = "users";
    const COLUMNS: &'static [&'static str] = &["id", "username", "password_hash"];

    fn id(&self) -> Id {
        self.id
    }
}

/// Registration shape. The raw password is hashed in the constructor and
/// never retained, so the fields stay private.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub(crate) username: String,
    pub(crate) password_hash: String,
}

impl NewUser {
    pub fn new(username: impl Into<String>, raw_password: &str) -> RepoResult<Self> {
        let username = username.into();
        if username.trim().is_empty() {
            return Err(RepoError::Validation("username must not be empty"));
        }
        if raw_password.is_empty() {
            return Err(RepoError::Validation("password must not be empty"));
        }
        Ok(Self {
            password_hash: password::hash(raw_password)?,
            username,
        })
    }

    pub fn username(&self) -> &str {
        &self.username
    }
}

impl Insert for NewUser {
    type Output = User;
    const COLUMNS: &'static [&'static str] = &["username", "password_hash"];

    fn values(&self) -> Vec<ColumnValue> {
        vec![
            self.username.as_str().into(),
            self.password_hash.as_str().into(),
        ]
    }

    fn validate(&self) -> RepoResult<()> {
        if self.username.trim().is_empty() {
            return Err(RepoError::Validation("username must not be empty"));
        }
        Ok(())
    }
}

// ---------------- Post ----------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: Id,
    #[serde(rename = "author_id")]
    pub author: Lazy<User>,
    pub title: String,
    pub body: String,
    pub like_count: i32,
    pub created: DateTime<Utc>,
}

impl Post {
    /// Resolve the author reference, caching the row on this instance.
    /// Fails with `NotFound` if the author row no longer exists.
    pub async fn author<R: UserRepo + ?Sized>(&mut self, repo: &R) -> RepoResult<&User> {
        self.author
            .resolve_with(|id| async move {
                repo.get_user(Filter::new().eq("id", id))
                    .await?
                    .ok_or(RepoError::NotFound)
            })
            .await
    }

    /// Likes attached to this post. Queried per call, never cached.
    pub async fn likes<R: LikeRepo + ?Sized>(&self, repo: &R) -> RepoResult<Vec<Like>> {
        repo.list_likes(Filter::new().eq("post_id", self.id)).await
    }

    /// Replies to this post, oldest first.
    pub async fn replies<R: ReplyRepo + ?Sized>(&self, repo: &R) -> RepoResult<Vec<Reply>> {
        repo.list_replies(Filter::new().eq("post_id", self.id)).await
    }
}

impl Record for Post {
    const TABLE: &'static str = "posts";
    const COLUMNS: &'static [&'static str] =
        &["id", "author_id", "title", "body", "like_count", "created"];
    const ORDER_BY: Option<&'static str> = Some("created DESC, id DESC");

    fn id(&self) -> Id {
        self.id
    }
}

impl<'r> sqlx::FromRow<'r, PgRow> for Post {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            author: Lazy::Key(row.try_get("author_id")?),
            title: row.try_get("title")?,
            body: row.try_get("body")?,
            like_count: row.try_get("like_count")?,
            created: row.try_get("created")?,
        })
    }
}

/// Creation shape for a post. The author is always passed explicitly; there
/// is no ambient current-user state in this crate.
#[derive(Debug, Clone)]
pub struct NewPost {
    pub author: Lazy<User>,
    pub title: String,
    pub body: String,
}

impl NewPost {
    pub fn new(
        author: impl Into<Lazy<User>>,
        title: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            author: author.into(),
            title: title.into(),
            body: body.into(),
        }
    }
}

impl Insert for NewPost {
    type Output = Post;
    const COLUMNS: &'static [&'static str] = &["author_id", "title", "body"];

    fn values(&self) -> Vec<ColumnValue> {
        vec![
            self.author.key().into(),
            self.title.as_str().into(),
            self.body.as_str().into(),
        ]
    }

    fn validate(&self) -> RepoResult<()> {
        if self.title.trim().is_empty() {
            return Err(RepoError::Validation("title must not be empty"));
        }
        if self.body.trim().is_empty() {
            return Err(RepoError::Validation("body must not be empty"));
        }
        Ok(())
    }
}

/// Partial update for a post; absent fields keep their stored value.
#[derive(Debug, Clone, Default)]
pub struct UpdatePost {
    pub title: Option<String>,
    pub body: Option<String>,
}

// ---------------- Like ----------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Like {
    pub id: Id,
    #[serde(rename = "post_id")]
    pub post: Lazy<Post>,
    #[serde(rename = "user_id")]
    pub user: Lazy<User>,
    pub created: DateTime<Utc>,
}

impl Like {
    pub async fn post<R: PostRepo + ?Sized>(&mut self, repo: &R) -> RepoResult<&Post> {
        self.post
            .resolve_with(|id| repo.get_post(id, AuthorCheck::Skip))
            .await
    }

    pub async fn user<R: UserRepo + ?Sized>(&mut self, repo: &R) -> RepoResult<&User> {
        self.user
            .resolve_with(|id| async move {
                repo.get_user(Filter::new().eq("id", id))
                    .await?
                    .ok_or(RepoError::NotFound)
            })
            .await
    }
}

impl Record for Like {
    const TABLE: &'static str = "likes";
    const COLUMNS: &'static [&'static str] = &["id", "post_id", "user_id", "created"];

    fn id(&self) -> Id {
        self.id
    }
}

impl<'r> sqlx::FromRow<'r, PgRow> for Like {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            post: Lazy::Key(row.try_get("post_id")?),
            user: Lazy::Key(row.try_get("user_id")?),
            created: row.try_get("created")?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct NewLike {
    pub post: Lazy<Post>,
    pub user: Lazy<User>,
}

impl NewLike {
    pub fn new(post: impl Into<Lazy<Post>>, user: impl Into<Lazy<User>>) -> Self {
        Self {
            post: post.into(),
            user: user.into(),
        }
    }
}

impl Insert for NewLike {
    type Output = Like;
    const COLUMNS: &'static [&'static str] = &["post_id", "user_id"];

    fn values(&self) -> Vec<ColumnValue> {
        vec![self.post.key().into(), self.user.key().into()]
    }

    fn validate(&self) -> RepoResult<()> {
        Ok(())
    }
}

/// Outcome of a like toggle, mirroring what the web layer renders.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LikeState {
    pub liked: bool,
    pub like_count: i32,
}

// ---------------- Reply ----------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reply {
    pub id: Id,
    #[serde(rename = "post_id")]
    pub post: Lazy<Post>,
    #[serde(rename = "user_id")]
    pub user: Lazy<User>,
    pub body: String,
    pub created: DateTime<Utc>,
}

impl Reply {
    pub async fn post<R: PostRepo + ?Sized>(&mut self, repo: &R) -> RepoResult<&Post> {
        self.post
            .resolve_with(|id| repo.get_post(id, AuthorCheck::Skip))
            .await
    }

    pub async fn user<R: UserRepo + ?Sized>(&mut self, repo: &R) -> RepoResult<&User> {
        self.user
            .resolve_with(|id| async move {
                repo.get_user(Filter::new().eq("id", id))
                    .await?
                    .ok_or(RepoError::NotFound)
            })
            .await
    }
}

impl Record for Reply {
    const TABLE: &'static str = "replies";
    const COLUMNS: &'static [&'static str] = &["id", "post_id", "user_id", "body", "created"];
    const ORDER_BY: Option<&'static str> = Some("created ASC, id ASC");

    fn id(&self) -> Id {
        self.id
    }
}

impl<'r> sqlx::FromRow<'r, PgRow> for Reply {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            post: Lazy::Key(row.try_get("post_id")?),
            user: Lazy::Key(row.try_get("user_id")?),
            body: row.try_get("body")?,
            created: row.try_get("created")?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct NewReply {
    pub post: Lazy<Post>,
    pub user: Lazy<User>,
    pub body: String,
}

impl NewReply {
    pub fn new(
        post: impl Into<Lazy<Post>>,
        user: impl Into<Lazy<User>>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            post: post.into(),
            user: user.into(),
            body: body.into(),
        }
    }
}

impl Insert for NewReply {
    type Output = Reply;
    const COLUMNS: &'static [&'static str] = &["post_id", "user_id", "body"];

    fn values(&self) -> Vec<ColumnValue> {
        vec![
            self.post.key().into(),
            self.user.key().into(),
            self.body.as_str().into(),
        ]
    }

    fn validate(&self) -> RepoResult<()> {
        if self.body.trim().is_empty() {
            return Err(RepoError::Validation("reply body must not be empty"));
        }
        Ok(())
    }
}
