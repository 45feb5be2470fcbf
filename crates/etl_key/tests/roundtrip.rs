use contracts::{ProvenanceKind, ProvenanceNode, UNKNOWN_ID};
use proptest::prelude::*;

fn id() -> impl Strategy<Value = i64> {
    prop_oneof![
        9 => 0i64..10_000,
        1 => Just(UNKNOWN_ID),
    ]
}

fn kind() -> impl Strategy<Value = ProvenanceKind> {
    prop_oneof![Just(ProvenanceKind::Join), Just(ProvenanceKind::Aggregation)]
}

fn provenance() -> impl Strategy<Value = ProvenanceNode> {
    id().prop_map(ProvenanceNode::root)
        .prop_recursive(8, 16, 1, |inner| {
            (id(), kind(), inner)
                .prop_map(|(id, kind, source)| ProvenanceNode::derived(id, kind, source))
        })
}

proptest! {
    #[test]
    fn decode_inverts_encode(node in provenance()) {
        let key = etl_key::encode(&node);
        prop_assert_eq!(etl_key::decode(&key).unwrap(), node);
    }

    #[test]
    fn encode_inverts_decode(node in provenance()) {
        let key = etl_key::encode(&node);
        let decoded = etl_key::decode(&key).unwrap();
        prop_assert_eq!(etl_key::encode(&decoded), key);
    }

    #[test]
    fn extension_does_not_change_decoding(node in provenance()) {
        let key = etl_key::encode(&node);
        let stored = format!("{key}.json.gz");
        prop_assert_eq!(etl_key::decode(&stored).unwrap(), node);
    }

    #[test]
    fn parent_of_derived_is_source(node in provenance()) {
        let key = etl_key::encode(&node);
        let parent = etl_key::parent_key(&key).unwrap();
        prop_assert_eq!(parent, node.source().map(etl_key::encode));
        prop_assert!(etl_key::derives_from(&key, &key));
    }
}
