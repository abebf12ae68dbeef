pub mod models;
pub mod password;
pub mod record;
pub mod repo;

// Re-export commonly used items for tests / external users
pub use models::{
    Id, Lazy, Like, LikeState, NewLike, NewPost, NewReply, NewUser, Post, Reply, UpdatePost, User,
};
pub use record::{ColumnValue, Filter, Insert, Record};
pub use repo::{
    assert_owner, AuthorCheck, LikeRepo, PostRepo, Repo, ReplyRepo, RepoError, RepoResult, UserRepo,
};
