//! # Query Pipeline Integration Tests
//!
//! End-to-end behavior of the Features façade over a small built GOL:
//! GOQL compilation, matcher evaluation against tag tables, spatial and
//! predicate filters, tile-index pruning, and the scalar reducers. All
//! expectations are computed from the fixture by hand, not from running
//! the code.
//!
//! ## Fixture
//!
//! | Feature      | Tags                                          | Bounds |
//! |--------------|-----------------------------------------------|--------|
//! | way 1        | highway=primary, name="Main Street", maxspeed=100 | (0,0)-(1000,1000) |
//! | way 2        | highway=primary, maxspeed=60                  | (5000,5000)-(6000,6000) |
//! | way 3        | highway=secondary, name="Minor Road"          | (-2000,-2000)-(-1000,-1000) |
//! | node 10      | amenity=pub, name="The Anchor"                | (100,100) |
//! | node 11      | amenity=cafe, note=quiet (local key)          | (-500,300) |
//! | relation 20  | route=bus (local key)                         | (0,0)-(10000,10000) |
//!
//! Global keys: highway, name, amenity, maxspeed.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use goldb::{BBox, Coordinate, Features, GolBuilder, QueryError, Tile};

fn build_fixture() -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fixture.gol");

    let mut builder = GolBuilder::new();
    builder.global_keys(["highway", "name", "amenity", "maxspeed"]);
    builder.add_way(
        1,
        BBox::new(0, 0, 1000, 1000),
        &[
            ("highway", "primary"),
            ("name", "Main Street"),
            ("maxspeed", "100"),
        ],
    );
    builder.add_way(
        2,
        BBox::new(5000, 5000, 6000, 6000),
        &[("highway", "primary"), ("maxspeed", "60")],
    );
    builder.add_way(
        3,
        BBox::new(-2000, -2000, -1000, -1000),
        &[("highway", "secondary"), ("name", "Minor Road")],
    );
    builder.add_node(
        10,
        Coordinate::new(100, 100),
        &[("amenity", "pub"), ("name", "The Anchor")],
    );
    builder.add_node(
        11,
        Coordinate::new(-500, 300),
        &[("amenity", "cafe"), ("note", "quiet")],
    );
    builder.add_relation(20, BBox::new(0, 0, 10_000, 10_000), &[("route", "bus")]);
    builder.write(&path).unwrap();

    (dir, path)
}

fn world() -> (tempfile::TempDir, Features) {
    let (dir, path) = build_fixture();
    let features = Features::new(&path).unwrap();
    (dir, features)
}

mod counting {
    use super::*;

    #[test]
    fn full_store_and_per_type_counts() {
        let (_dir, world) = world();

        assert_eq!(world.count().unwrap(), 6);
        assert_eq!(world.nodes().count().unwrap(), 2);
        assert_eq!(world.ways().count().unwrap(), 3);
        assert_eq!(world.relations().count().unwrap(), 1);
    }

    #[test]
    fn node_count_equals_sum_over_tiles() {
        let (_dir, world) = world();

        // Walking per-tile through distinct spatial quadrants must sum to
        // the global node count.
        let quadrants = [
            BBox::new(0, 0, i32::MAX, i32::MAX),
            BBox::new(i32::MIN, 0, -1, i32::MAX),
            BBox::new(i32::MIN, i32::MIN, -1, -1),
            BBox::new(0, i32::MIN, i32::MAX, -1),
        ];
        let total: usize = quadrants
            .iter()
            .map(|q| world.nodes().within(q).count().unwrap())
            .sum();

        assert_eq!(total, world.nodes().count().unwrap());
    }

    #[test]
    fn results_are_not_cached_between_materializations() {
        let (_dir, world) = world();
        let calls = Arc::new(AtomicUsize::new(0));
        let counting = {
            let calls = Arc::clone(&calls);
            world.filter(move |_| {
                calls.fetch_add(1, Ordering::Relaxed);
                true
            })
        };

        counting.count().unwrap();
        let after_first = calls.load(Ordering::Relaxed);
        counting.count().unwrap();

        assert_eq!(calls.load(Ordering::Relaxed), after_first * 2);
    }
}

mod goql {
    use super::*;

    #[test]
    fn key_value_equality() {
        let (_dir, world) = world();

        assert_eq!(world.query("[highway=primary]").unwrap().count().unwrap(), 2);
        assert_eq!(
            world.query("[highway=secondary]").unwrap().count().unwrap(),
            1
        );
        assert_eq!(world.query("[highway=motorway]").unwrap().count().unwrap(), 0);
    }

    #[test]
    fn key_presence_and_absence() {
        let (_dir, world) = world();

        assert_eq!(world.query("[highway]").unwrap().count().unwrap(), 3);
        assert_eq!(world.query("[!highway]").unwrap().count().unwrap(), 3);
        assert_eq!(world.query("[name]").unwrap().count().unwrap(), 3);
    }

    #[test]
    fn inequality_also_matches_absent_keys() {
        let (_dir, world) = world();

        // 1 non-primary highway + 3 features without highway at all
        assert_eq!(
            world.query("[highway!=primary]").unwrap().count().unwrap(),
            4
        );
    }

    #[test]
    fn numeric_comparisons() {
        let (_dir, world) = world();

        assert_eq!(world.query("[maxspeed>=100]").unwrap().count().unwrap(), 1);
        assert_eq!(world.query("[maxspeed<100]").unwrap().count().unwrap(), 1);
        assert_eq!(world.query("[maxspeed=60]").unwrap().count().unwrap(), 1);
        assert_eq!(world.query("[maxspeed>200]").unwrap().count().unwrap(), 0);
    }

    #[test]
    fn regex_matches_whole_values() {
        let (_dir, world) = world();

        assert_eq!(world.query("[name~\"M.*\"]").unwrap().count().unwrap(), 2);
        // Substring without wildcard must not match.
        assert_eq!(world.query("[name~\"Main\"]").unwrap().count().unwrap(), 0);
        assert_eq!(
            world.query("[name~\".*Street\"]").unwrap().count().unwrap(),
            1
        );
    }

    #[test]
    fn type_selectors_gate_results() {
        let (_dir, world) = world();

        assert_eq!(world.query("n[amenity=pub]").unwrap().count().unwrap(), 1);
        assert_eq!(world.query("w[amenity=pub]").unwrap().count().unwrap(), 0);
        assert_eq!(world.query("n").unwrap().count().unwrap(), 2);
        assert_eq!(world.query("a").unwrap().count().unwrap(), 4);
        assert_eq!(world.query("nw").unwrap().count().unwrap(), 5);
    }

    #[test]
    fn comma_means_or() {
        let (_dir, world) = world();

        let combined = world
            .query("n[amenity=pub], w[highway=primary]")
            .unwrap()
            .count()
            .unwrap();

        assert_eq!(combined, 3);
    }

    #[test]
    fn conjoined_clauses_all_apply() {
        let (_dir, world) = world();

        assert_eq!(
            world
                .query("w[highway=primary][maxspeed>=100]")
                .unwrap()
                .count()
                .unwrap(),
            1
        );
    }

    #[test]
    fn local_keys_resolve_without_the_string_table() {
        let (_dir, world) = world();

        assert_eq!(world.query("[note=quiet]").unwrap().count().unwrap(), 1);
        assert_eq!(world.query("[route=bus]").unwrap().count().unwrap(), 1);
    }

    #[test]
    fn stacked_queries_intersect() {
        let (_dir, world) = world();

        let stacked = world
            .query("w")
            .unwrap()
            .query("[highway=primary]")
            .unwrap();

        assert_eq!(stacked.count().unwrap(), 2);
    }

    #[test]
    fn syntax_errors_surface_with_columns() {
        let (_dir, world) = world();

        let err = world.query("w[highway=primary").unwrap_err();

        assert!(matches!(
            err.downcast_ref::<QueryError>(),
            Some(QueryError::Syntax { .. })
        ));
    }
}

mod spatial {
    use super::*;

    #[test]
    fn within_box_restricts_results() {
        let (_dir, world) = world();

        let inside = world.within(&BBox::new(0, 0, 2000, 2000));

        // way 1 and node 10; relation 20 exceeds the box.
        assert_eq!(inside.count().unwrap(), 2);
    }

    #[test]
    fn tile_box_query_is_a_subset_of_the_world() {
        let (_dir, world) = world();

        let tile = Tile::from_string("5/17/9").unwrap();
        assert_eq!((tile.zoom(), tile.column(), tile.row()), (5, 17, 9));

        let in_tile = world.within(&tile.bounds()).count().unwrap();
        assert!(in_tile <= world.count().unwrap());
    }

    #[test]
    fn intersecting_is_looser_than_within() {
        let (_dir, world) = world();
        let probe = BBox::new(0, 0, 2000, 2000);

        let within = world.within(&probe).count().unwrap();
        let intersecting = world.intersecting(&probe).count().unwrap();

        // relation 20 overlaps the probe without being contained.
        assert_eq!(intersecting, within + 1);
    }

    #[test]
    fn containing_finds_covering_features() {
        let (_dir, world) = world();

        let covering = world.containing(Coordinate::new(500, 500));

        // way 1 and relation 20 cover the point.
        assert_eq!(covering.count().unwrap(), 2);
    }

    #[test]
    fn max_meters_from_uses_the_length_scale() {
        let (_dir, world) = world();
        let anchor = Coordinate::new(0, 0);

        // node 10 is ~141 plane units (~1.3 m) away; node 11 is ~583
        // units (~5.4 m) away.
        assert_eq!(
            world.nodes().max_meters_from(2.0, anchor).count().unwrap(),
            1
        );
        assert_eq!(
            world.nodes().max_meters_from(10.0, anchor).count().unwrap(),
            2
        );
    }
}

mod materialization {
    use super::*;

    #[test]
    fn construction_is_lazy() {
        let (_dir, world) = world();
        let touched = Arc::new(AtomicBool::new(false));

        let pending = {
            let touched = Arc::clone(&touched);
            world
                .within(&BBox::new(0, 0, 1000, 1000))
                .filter(move |_| {
                    touched.store(true, Ordering::Relaxed);
                    true
                })
        };

        assert!(!touched.load(Ordering::Relaxed));
        let _ = pending.count().unwrap();
        assert!(touched.load(Ordering::Relaxed));
    }

    #[test]
    fn iteration_is_deterministic() {
        let (_dir, world) = world();

        let ids = |features: &Features| -> Vec<u64> {
            features.iter().map(|f| f.unwrap().id()).collect()
        };

        assert_eq!(ids(&world), ids(&world));
    }

    #[test]
    fn one_returns_the_unique_match() {
        let (_dir, world) = world();

        let the_pub = world.query("n[amenity=pub]").unwrap().one().unwrap();

        assert_eq!(the_pub.id(), 10);
        assert_eq!(the_pub.tag("name"), Some("The Anchor"));
    }

    #[test]
    fn one_rejects_zero_and_many() {
        let (_dir, world) = world();

        let none = world.query("[amenity=bank]").unwrap().one().unwrap_err();
        assert!(matches!(
            none.downcast_ref::<QueryError>(),
            Some(QueryError::Empty)
        ));

        let many = world.query("[highway=primary]").unwrap().one().unwrap_err();
        assert!(matches!(
            many.downcast_ref::<QueryError>(),
            Some(QueryError::NotUnique { count: 2 })
        ));
    }

    #[test]
    fn first_and_to_vec() {
        let (_dir, world) = world();

        let primaries = world.query("[highway=primary]").unwrap();
        assert!(primaries.first().unwrap().is_some());

        let collected = primaries.to_vec().unwrap();
        assert_eq!(collected.len(), 2);
        assert!(collected.iter().all(|f| f.tag("highway") == Some("primary")));
    }

    #[test]
    fn contains_respects_the_collection_criteria() {
        let (_dir, world) = world();

        let the_pub = world.query("n[amenity=pub]").unwrap().one().unwrap();

        assert!(world.contains(&the_pub).unwrap());
        assert!(world.nodes().contains(&the_pub).unwrap());
        assert!(!world.ways().contains(&the_pub).unwrap());
    }

    #[test]
    fn tags_read_back_global_and_local_keys() {
        let (_dir, world) = world();

        let cafe = world.query("n[amenity=cafe]").unwrap().one().unwrap();

        assert_eq!(cafe.tag("amenity"), Some("cafe"));
        assert_eq!(cafe.tag("note"), Some("quiet"));
        assert_eq!(cafe.tag("highway"), None);

        let mut tags = cafe.tags();
        tags.sort();
        assert_eq!(
            tags,
            vec![
                ("amenity".to_string(), "cafe".to_string()),
                ("note".to_string(), "quiet".to_string()),
            ]
        );
    }

    #[test]
    fn dropping_an_iterator_mid_stream_is_clean() {
        let (_dir, world) = world();

        let mut iter = world.iter();
        let first = iter.next();
        assert!(first.is_some());
        drop(iter);

        // The store stays fully usable.
        assert_eq!(world.count().unwrap(), 6);
    }

    #[test]
    fn empty_view_conversions_yield_nothing() {
        let (_dir, world) = world();

        let nodes = world.nodes();
        let impossible: goldb::Ways = nodes.into();

        assert_eq!(impossible.count().unwrap(), 0);
    }
}

#[cfg(feature = "multithreaded")]
mod parallel {
    use super::*;

    #[test]
    fn parallel_count_matches_sequential_iteration() {
        let (_dir, world) = world();

        let streamed = world.iter().count();

        assert_eq!(world.count().unwrap(), streamed);
    }

    #[test]
    fn predicates_run_on_worker_threads_safely() {
        let (_dir, world) = world();
        let calls = Arc::new(AtomicUsize::new(0));

        let filtered = {
            let calls = Arc::clone(&calls);
            world.filter(move |_| {
                calls.fetch_add(1, Ordering::Relaxed);
                true
            })
        };

        assert_eq!(filtered.count().unwrap(), 6);
        assert_eq!(calls.load(Ordering::Relaxed), 6);
    }
}
