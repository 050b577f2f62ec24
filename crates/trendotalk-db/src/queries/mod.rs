pub mod dm;
pub mod posts;
pub mod users;
pub mod vibes;

/// Canonical ordering for an unordered user pair: chats are stored with
/// `user1_id < user2_id` so a pair maps to exactly one row.
pub(crate) fn pair<'a>(a: &'a str, b: &'a str) -> (&'a str, &'a str) {
    if a <= b { (a, b) } else { (b, a) }
}
