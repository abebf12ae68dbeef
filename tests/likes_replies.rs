#![cfg(feature = "inmem-store")]

use rblog::{
    repo::inmem::InMemRepo, AuthorCheck, Filter, Lazy, NewLike, NewPost, NewReply, NewUser, Post,
    RepoError, User,
};
// Bring trait method namespaces into scope so calls on InMemRepo resolve.
use rblog::repo::{LikeRepo, PostRepo, ReplyRepo, UserRepo};

fn repo() -> InMemRepo {
    let dir = tempfile::tempdir().unwrap();
    InMemRepo::with_snapshot(dir.path().join("state.json"))
}

async fn register(r: &InMemRepo, username: &str) -> User {
    r.create_user(NewUser::new(username, "pw").unwrap())
        .await
        .unwrap()
}

async fn publish(r: &InMemRepo, author: &User, title: &str) -> Post {
    r.create_post(NewPost::new(author.id, title, "body"))
        .await
        .unwrap()
}

#[tokio::test]
async fn toggle_flips_like_state_and_counter_in_lockstep() {
    let r = repo();
    let alice = register(&r, "alice").await;
    let bob = register(&r, "bob").await;
    let post = publish(&r, &alice, "hello").await;

    let on = r.toggle_like(post.id, bob.id).await.unwrap();
    assert!(on.liked);
    assert_eq!(on.like_count, 1);
    assert_eq!(
        r.get_post(post.id, AuthorCheck::Skip).await.unwrap().like_count,
        1
    );

    // a second toggle restores both the state and the counter
    let off = r.toggle_like(post.id, bob.id).await.unwrap();
    assert!(!off.liked);
    assert_eq!(off.like_count, 0);
    assert_eq!(
        r.get_post(post.id, AuthorCheck::Skip).await.unwrap().like_count,
        0
    );
    assert!(r
        .list_likes(Filter::new().eq("post_id", post.id))
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn toggle_counts_one_like_per_user() {
    let r = repo();
    let alice = register(&r, "alice").await;
    let bob = register(&r, "bob").await;
    let carol = register(&r, "carol").await;
    let post = publish(&r, &alice, "popular").await;

    r.toggle_like(post.id, bob.id).await.unwrap();
    let state = r.toggle_like(post.id, carol.id).await.unwrap();
    assert_eq!(state.like_count, 2);

    let state = r.toggle_like(post.id, bob.id).await.unwrap();
    assert!(!state.liked);
    assert_eq!(state.like_count, 1);
    let remaining = r
        .list_likes(Filter::new().eq("post_id", post.id))
        .await
        .unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].user.key(), carol.id);
}

#[tokio::test]
async fn toggling_a_missing_post_is_not_found() {
    let r = repo();
    let bob = register(&r, "bob").await;

    let err = r.toggle_like(77, bob.id).await.unwrap_err();
    assert!(matches!(err, RepoError::NotFound));
}

#[tokio::test]
async fn raw_like_primitives_enforce_the_pair_constraint() {
    let r = repo();
    let alice = register(&r, "alice").await;
    let bob = register(&r, "bob").await;
    let post = publish(&r, &alice, "hello").await;

    // entities and raw ids are interchangeable in the creation shape
    let like = r
        .create_like(NewLike::new(post.clone(), bob.id))
        .await
        .unwrap();
    assert_eq!(like.post.key(), post.id);
    assert_eq!(like.user.key(), bob.id);
    assert_eq!(
        r.get_post(post.id, AuthorCheck::Skip).await.unwrap().like_count,
        1
    );

    let err = r
        .create_like(NewLike::new(post.id, bob.id))
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::DuplicateKey));

    r.delete_like(post.id, bob.id).await.unwrap();
    assert_eq!(
        r.get_post(post.id, AuthorCheck::Skip).await.unwrap().like_count,
        0
    );

    let err = r.delete_like(post.id, bob.id).await.unwrap_err();
    assert!(matches!(err, RepoError::NotFound));
}

#[tokio::test]
async fn deleting_a_post_leaves_orphaned_likes_and_replies() {
    let r = repo();
    let alice = register(&r, "alice").await;
    let bob = register(&r, "bob").await;
    let post = publish(&r, &alice, "doomed").await;

    r.toggle_like(post.id, bob.id).await.unwrap();
    r.create_reply(NewReply::new(post.id, bob.id, "nice"))
        .await
        .unwrap();

    // delete succeeds even with live likes and replies attached
    r.delete_post(post.id, alice.id).await.unwrap();
    let err = r.get_post(post.id, AuthorCheck::Skip).await.unwrap_err();
    assert!(matches!(err, RepoError::NotFound));

    // no cascade: the rows are orphaned, not removed
    let likes = r
        .list_likes(Filter::new().eq("post_id", post.id))
        .await
        .unwrap();
    assert_eq!(likes.len(), 1);
    let replies = r
        .list_replies(Filter::new().eq("post_id", post.id))
        .await
        .unwrap();
    assert_eq!(replies.len(), 1);

    // and the gone post no longer accepts toggles
    let err = r.toggle_like(post.id, bob.id).await.unwrap_err();
    assert!(matches!(err, RepoError::NotFound));
}

#[tokio::test]
async fn replies_list_oldest_first() {
    let r = repo();
    let alice = register(&r, "alice").await;
    let bob = register(&r, "bob").await;
    let post = publish(&r, &alice, "thread").await;

    for body in ["first", "second", "third"] {
        r.create_reply(NewReply::new(post.id, bob.id, body))
            .await
            .unwrap();
    }

    let bodies: Vec<_> = post
        .replies(&r)
        .await
        .unwrap()
        .into_iter()
        .map(|reply| reply.body)
        .collect();
    assert_eq!(bodies, ["first", "second", "third"]);
}

#[tokio::test]
async fn replies_need_an_existing_post_and_user() {
    let r = repo();
    let bob = register(&r, "bob").await;

    let err = r
        .create_reply(NewReply::new(55, bob.id, "hi"))
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::NotFound));

    let alice = register(&r, "alice").await;
    let post = publish(&r, &alice, "hello").await;
    let err = r
        .create_reply(NewReply::new(post.id, 99, "hi"))
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::NotFound));

    let err = r
        .create_reply(NewReply::new(post.id, bob.id, "   "))
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::Validation(_)));
}

#[tokio::test]
async fn author_resolves_lazily_and_is_cached() {
    let r = repo();
    let alice = register(&r, "alice").await;
    let mut post = publish(&r, &alice, "hello").await;

    // fresh instances hold only the foreign key
    assert!(matches!(post.author, Lazy::Key(_)));

    let author = post.author(&r).await.unwrap();
    assert_eq!(author.username, "alice");

    // resolution replaced the tag in place; later reads hit the cache
    assert!(matches!(post.author, Lazy::Loaded(_)));
    assert_eq!(post.author(&r).await.unwrap().id, alice.id);
}

#[tokio::test]
async fn like_and_reply_references_resolve_to_their_rows() {
    let r = repo();
    let alice = register(&r, "alice").await;
    let bob = register(&r, "bob").await;
    let post = publish(&r, &alice, "hello").await;

    let mut like = r.create_like(NewLike::new(post.id, bob.id)).await.unwrap();
    assert_eq!(like.post(&r).await.unwrap().title, "hello");
    assert_eq!(like.user(&r).await.unwrap().username, "bob");

    let mut reply = r
        .create_reply(NewReply::new(post.id, bob.id, "hi"))
        .await
        .unwrap();
    assert_eq!(reply.post(&r).await.unwrap().id, post.id);
    assert_eq!(reply.user(&r).await.unwrap().id, bob.id);
}

#[tokio::test]
async fn post_accessors_requery_likes_per_call() {
    let r = repo();
    let alice = register(&r, "alice").await;
    let bob = register(&r, "bob").await;
    let post = publish(&r, &alice, "hello").await;

    assert!(post.likes(&r).await.unwrap().is_empty());

    r.toggle_like(post.id, bob.id).await.unwrap();
    let likes = post.likes(&r).await.unwrap();
    assert_eq!(likes.len(), 1);
    assert_eq!(likes[0].user.key(), bob.id);

    r.toggle_like(post.id, bob.id).await.unwrap();
    assert!(post.likes(&r).await.unwrap().is_empty());
}
