//! Full-text index synchronisation under random write sequences.
//!
//! A seeded xorshift generator drives creates, updates, deletes, merge
//! imports and the occasional vacuum against a file-backed SQLite store. A
//! second connection then asks the index directly whether each
//! touched id and question word is present exactly as often as the model
//! says it should be.

use std::collections::HashMap;
use std::path::Path;

use rusqlite::Connection;

use clarify_core::{Context, Entry, ImportMode};
use clarify_storage::{EntryStore, SqliteStore};

// =============================================================================
// Helpers
// =============================================================================

struct XorShift(u64);

impl XorShift {
    fn next(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }

    fn below(&mut self, n: u64) -> u64 {
        self.next() % n
    }
}

/// Live entries: id to the version word currently in its question.
type Model = HashMap<String, u64>;

fn entry(id: &str, version: u64) -> Entry {
    Entry::new(
        id,
        format!("topic w{} for {}", version, id),
        format!("answer a{}", version),
        "2025-01-01",
    )
}

fn reader(path: &Path) -> Connection {
    Connection::open(path).unwrap()
}

fn index_hits(conn: &Connection, expression: &str) -> i64 {
    conn.query_row(
        "SELECT COUNT(*) FROM entries_fts WHERE entries_fts MATCH ?1",
        [expression],
        |row| row.get(0),
    )
    .unwrap()
}

fn assert_id_indexed(conn: &Connection, model: &Model, id: &str, step: usize) {
    let expected = i64::from(model.contains_key(id));
    assert_eq!(
        index_hits(conn, &format!("id:\"{}\"", id)),
        expected,
        "step {}: id {}",
        step,
        id
    );
}

fn assert_word_indexed(conn: &Connection, version: u64, expected: i64, step: usize) {
    assert_eq!(
        index_hits(conn, &format!("canonical_question:\"w{}\"", version)),
        expected,
        "step {}: question word w{}",
        step,
        version
    );
    assert_eq!(
        index_hits(conn, &format!("current_answer:\"a{}\"", version)),
        expected,
        "step {}: answer word a{}",
        step,
        version
    );
}

// =============================================================================
// Property
// =============================================================================

fn run_sequence(seed: u64, steps: usize) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sync.db");
    let store = SqliteStore::open(&path).unwrap();
    let ctx = Context::background();

    let mut rng = XorShift(seed);
    let mut model = Model::new();
    let mut version = 0u64;

    for step in 0..steps {
        let id = format!("n{}", rng.below(40));
        let previous = model.get(&id).copied();
        let op = rng.below(10);

        match op {
            0..=3 => {
                version += 1;
                let created = store.create(&ctx, &entry(&id, version));
                match previous {
                    Some(_) => assert!(created.unwrap_err().is_duplicate()),
                    None => {
                        created.unwrap();
                        model.insert(id.clone(), version);
                    }
                }
            }
            4..=5 => {
                version += 1;
                let updated = store.update(&ctx, &entry(&id, version));
                match previous {
                    Some(_) => {
                        updated.unwrap();
                        model.insert(id.clone(), version);
                    }
                    None => assert!(updated.unwrap_err().is_not_found()),
                }
            }
            6..=7 => {
                let deleted = store.delete(&ctx, &id);
                match previous {
                    Some(_) => {
                        deleted.unwrap();
                        model.remove(&id);
                    }
                    None => assert!(deleted.unwrap_err().is_not_found()),
                }
            }
            8 => {
                version += 1;
                let batch = vec![entry(&id, version)];
                let result = store.import(&ctx, &batch, ImportMode::Merge).unwrap();
                assert_eq!(result.created + result.updated, 1);
                model.insert(id.clone(), version);
            }
            _ => {
                store.vacuum(&ctx).unwrap();
            }
        }

        let conn = reader(&path);
        assert_id_indexed(&conn, &model, &id, step);
        if let Some(old) = previous {
            let still_current = model.get(&id) == Some(&old);
            assert_word_indexed(&conn, old, i64::from(still_current), step);
        }
        if let Some(current) = model.get(&id) {
            assert_word_indexed(&conn, *current, 1, step);
        }

        if step % 25 == 0 {
            store.verify_search_index().unwrap();
        }
    }

    // Final sweep over every id ever used.
    store.verify_search_index().unwrap();
    let conn = reader(&path);
    for k in 0..40 {
        assert_id_indexed(&conn, &model, &format!("n{}", k), steps);
    }
    assert_eq!(
        index_hits(&conn, "canonical_question:topic"),
        model.len() as i64
    );
    assert_eq!(
        store.stats(&ctx).unwrap().total_entries,
        model.len()
    );
}

#[test]
fn test_index_tracks_random_writes() {
    for seed in [0x9E37_79B9_7F4A_7C15, 0xD1B5_4A32_D192_ED03, 42] {
        run_sequence(seed, 300);
    }
}

#[test]
fn test_index_survives_overwrite_import() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("overwrite.db");
    let store = SqliteStore::open(&path).unwrap();
    let ctx = Context::background();

    let first: Vec<Entry> = (0..10).map(|k| entry(&format!("n{}", k), k)).collect();
    store.bulk_insert(&ctx, &first).unwrap();

    let second: Vec<Entry> = (5..15).map(|k| entry(&format!("n{}", k), 100 + k)).collect();
    store.import(&ctx, &second, ImportMode::Overwrite).unwrap();
    store.verify_search_index().unwrap();

    let conn = reader(&path);
    for k in 0..10 {
        assert_word_indexed(&conn, k, 0, 0);
    }
    for k in 5..15 {
        assert_word_indexed(&conn, 100 + k, 1, 0);
    }
    assert_eq!(index_hits(&conn, "id:\"n2\""), 0);
    assert_eq!(index_hits(&conn, "id:\"n12\""), 1);
}
