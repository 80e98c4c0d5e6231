const ROOM_PREFIX: &str = "chat";
const ROOM_SEPARATOR: char = '_';

/// Order-independent id for the conversation between `a` and `b`.
///
/// Rooms are for client-side grouping only; nothing in routing or
/// authorization looks at them.
pub fn room_id(a: &str, b: &str) -> String {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    format!("{ROOM_PREFIX}{ROOM_SEPARATOR}{lo}{ROOM_SEPARATOR}{hi}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symmetric() {
        let pairs = [("alice", "bob"), ("bob", "alice"), ("Zed", "amy"), ("x", "x"), ("", "z")];
        for (a, b) in pairs {
            assert_eq!(room_id(a, b), room_id(b, a), "{a} / {b}");
        }
    }

    #[test]
    fn sorts_lexicographically() {
        assert_eq!(room_id("bob", "alice"), "chat_alice_bob");
        // Byte order: uppercase sorts before lowercase
        assert_eq!(room_id("amy", "Zed"), "chat_Zed_amy");
    }
}
