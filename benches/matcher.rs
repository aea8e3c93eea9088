//! Microbenchmarks for the two hot paths: matcher evaluation over a tag
//! table, and allocator churn in the blob store.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use goldb::store::BlobStore;
use goldb::{BBox, Coordinate, Features, GolBuilder};

fn fixture(dir: &tempfile::TempDir) -> Features {
    let path = dir.path().join("bench.gol");
    let mut builder = GolBuilder::new();
    builder.global_keys(["highway", "name", "maxspeed"]);
    for i in 0..1000u64 {
        let x = (i as i32 % 100) * 1000;
        let y = (i as i32 / 100) * 1000;
        builder.add_way(
            i,
            BBox::new(x, y, x + 500, y + 500),
            &[
                ("highway", if i % 3 == 0 { "primary" } else { "residential" }),
                ("maxspeed", if i % 2 == 0 { "50" } else { "100" }),
            ],
        );
    }
    builder.add_node(9999, Coordinate::new(0, 0), &[("name", "Origin")]);
    builder.write(&path).unwrap();
    Features::new(&path).unwrap()
}

fn bench_matcher(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let world = fixture(&dir);

    c.bench_function("count_tag_equality", |b| {
        let query = world.query("w[highway=primary]").unwrap();
        b.iter(|| black_box(query.count().unwrap()))
    });

    c.bench_function("count_numeric_and_regex", |b| {
        let query = world
            .query("w[maxspeed>=100][highway~\"prim.*|resid.*\"]")
            .unwrap();
        b.iter(|| black_box(query.count().unwrap()))
    });

    c.bench_function("compile_goql", |b| {
        b.iter(|| {
            black_box(
                world
                    .query("w[highway=primary][maxspeed>=100], n[name]")
                    .unwrap(),
            )
        })
    });
}

fn bench_alloc(c: &mut Criterion) {
    c.bench_function("alloc_free_cycle", |b| {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alloc.gol");
        let mut store = BlobStore::create(&path, 12).unwrap();

        b.iter(|| {
            let mut txn = store.begin().unwrap();
            let mut pages = Vec::with_capacity(64);
            for i in 0..64u32 {
                pages.push(txn.alloc(black_box(100 + i * 97)).unwrap());
            }
            for page in pages {
                txn.free(page).unwrap();
            }
            txn.commit().unwrap();
        })
    });
}

criterion_group!(benches, bench_matcher, bench_alloc);
criterion_main!(benches);
