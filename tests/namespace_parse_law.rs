//! Property tests for the namespace parse law: a namespaced tool name always
//! splits on the *first* `.` only, leaving any further dots in the original
//! tool name untouched.

use only1mcp::aggregator::tool_aggregator::parse_namespaced_name;
use proptest::prelude::*;

fn non_dot_segment() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9_-]{1,16}".prop_filter("must not contain a dot", |s| !s.contains('.'))
}

proptest! {
    #[test]
    fn splits_on_first_dot_regardless_of_how_many_follow(
        server in non_dot_segment(),
        rest in proptest::collection::vec(non_dot_segment(), 1..5),
    ) {
        let original_name = rest.join(".");
        let namespaced = format!("{}.{}", server, original_name);

        let parsed = parse_namespaced_name(&namespaced);
        prop_assert_eq!(parsed, Some((server.as_str(), original_name.as_str())));
    }

    #[test]
    fn names_without_a_dot_never_parse(name in non_dot_segment()) {
        prop_assert_eq!(parse_namespaced_name(&name), None);
    }
}
