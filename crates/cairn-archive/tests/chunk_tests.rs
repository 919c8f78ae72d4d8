//! Integration tests for chunk skipping, copying and nesting.

use std::io::{Cursor, Read};

use cairn_archive::prelude::*;
use proptest::prelude::*;

// -- helpers ----------------------------------------------------------------

#[derive(Debug, Clone)]
enum Node {
    Leaf(Magic, Vec<u8>),
    Branch(Magic, Vec<Node>),
}

fn magic_strategy() -> impl Strategy<Value = Magic> {
    prop::sample::select(vec![
        Magic::new(*b"SCEN"),
        Magic::new(*b"META"),
        Magic::new(*b"OBJS"),
        Magic::new(*b"CDEF"),
    ])
}

fn node_strategy() -> impl Strategy<Value = Node> {
    let leaf = (magic_strategy(), prop::collection::vec(any::<u8>(), 0..64))
        .prop_map(|(m, bytes)| Node::Leaf(m, bytes));
    leaf.prop_recursive(4, 32, 4, |inner| {
        (magic_strategy(), prop::collection::vec(inner, 0..4))
            .prop_map(|(m, children)| Node::Branch(m, children))
    })
}

fn write_node(w: &mut ChunkWriter<Cursor<Vec<u8>>>, node: &Node) -> Result<()> {
    match node {
        Node::Leaf(magic, bytes) => w.chunk(*magic, |w| w.put_raw(bytes)),
        Node::Branch(magic, children) => w.chunk(*magic, |w| {
            for child in children {
                write_node(w, child)?;
            }
            Ok(())
        }),
    }
}

/// Decode a node completely, reading every payload byte.
fn decode_node(r: &mut ChunkReader<Cursor<Vec<u8>>>, node: &Node) -> Result<()> {
    match node {
        Node::Leaf(magic, bytes) => r.chunk(*magic, |r| {
            let mut buf = vec![0u8; bytes.len()];
            r.read_exact(&mut buf)?;
            assert_eq!(&buf, bytes);
            Ok(())
        }),
        Node::Branch(magic, children) => r.chunk(*magic, |r| {
            for child in children {
                decode_node(r, child)?;
            }
            Ok(())
        }),
    }
}

fn encode(nodes: &[Node]) -> Vec<u8> {
    let mut w = ChunkWriter::new(Cursor::new(Vec::new()));
    for node in nodes {
        write_node(&mut w, node).unwrap();
    }
    w.into_inner().unwrap().into_inner()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn skip_next_lands_where_full_decode_lands(nodes in prop::collection::vec(node_strategy(), 1..5)) {
        let bytes = encode(&nodes);

        let mut decoded = ChunkReader::new(Cursor::new(bytes.clone())).unwrap();
        let mut skipped = ChunkReader::new(Cursor::new(bytes)).unwrap();

        for node in &nodes {
            decode_node(&mut decoded, node).unwrap();
            skipped.skip_next().unwrap();
            prop_assert_eq!(decoded.position(), skipped.position());
        }
        prop_assert!(!skipped.has_more().unwrap());
    }

    #[test]
    fn raw_copies_concatenate_back_into_the_original(nodes in prop::collection::vec(node_strategy(), 1..5)) {
        let bytes = encode(&nodes);
        let mut r = ChunkReader::new(Cursor::new(bytes.clone())).unwrap();

        let mut rebuilt = ChunkWriter::new(Cursor::new(Vec::new()));
        while r.has_more().unwrap() {
            let raw = r.read_next_raw().unwrap();
            rebuilt.write_raw_chunk(&raw).unwrap();
        }
        prop_assert_eq!(rebuilt.into_inner().unwrap().into_inner(), bytes);
    }
}

#[test]
fn preview_does_not_move_the_cursor() {
    let bytes = encode(&[
        Node::Leaf(Magic::new(*b"INFO"), vec![1, 2, 3]),
        Node::Leaf(Magic::new(*b"GLOB"), vec![]),
    ]);
    let mut r = ChunkReader::new(Cursor::new(bytes)).unwrap();

    let first = r.preview_next().unwrap().unwrap();
    assert_eq!(first.magic, Magic::new(*b"INFO"));
    assert_eq!(first.len, 3);
    assert_eq!(r.position(), 0);

    r.skip_next().unwrap();
    let second = r.preview_next().unwrap().unwrap();
    assert_eq!(second.magic, Magic::new(*b"GLOB"));
    assert_eq!(second.len, 0);
}

#[test]
fn nested_scopes_report_their_own_remaining_bytes() {
    let bytes = encode(&[Node::Branch(
        Magic::new(*b"SCEN"),
        vec![
            Node::Leaf(Magic::new(*b"META"), vec![0; 10]),
            Node::Leaf(Magic::new(*b"OBJS"), vec![0; 6]),
        ],
    )]);
    let mut r = ChunkReader::new(Cursor::new(bytes)).unwrap();
    r.begin(Magic::new(*b"SCEN")).unwrap();
    assert_eq!(r.remaining(), 8 + 10 + 8 + 6);
    r.skip_next().unwrap();
    assert_eq!(r.remaining(), 8 + 6);
    r.skip_next().unwrap();
    assert!(!r.has_more().unwrap());
    assert!(r.skip_next().is_err());
    r.end(Magic::new(*b"SCEN")).unwrap();
}

#[test]
fn mismatched_reader_end_is_fatal() {
    let bytes = encode(&[Node::Branch(
        Magic::new(*b"SCEN"),
        vec![Node::Leaf(Magic::new(*b"META"), vec![1])],
    )]);
    let mut r = ChunkReader::new(Cursor::new(bytes)).unwrap();
    r.begin(Magic::new(*b"SCEN")).unwrap();
    r.begin(Magic::new(*b"META")).unwrap();
    assert!(matches!(
        r.end(Magic::new(*b"SCEN")),
        Err(ArchiveError::ChunkMismatch { .. })
    ));
}

#[test]
fn failed_scoped_read_unwinds_every_chunk_it_opened() {
    let bytes = encode(&[Node::Branch(
        Magic::new(*b"SCEN"),
        vec![Node::Leaf(Magic::new(*b"META"), vec![1])],
    )]);
    let mut r = ChunkReader::new(Cursor::new(bytes)).unwrap();
    let result = r.chunk(Magic::new(*b"SCEN"), |r| {
        r.begin(Magic::new(*b"META"))?;
        r.get_u64()
    });
    assert!(result.is_err());
    assert_eq!(r.depth(), 0);
}
