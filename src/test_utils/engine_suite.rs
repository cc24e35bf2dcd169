use std::ops::ControlFlow;
use std::path::Path;
use std::sync::Arc;

use crate::Engine;
use crate::Error;
use crate::Reader;
use crate::SstWriter;
use crate::WriteBatch;
use crate::Writer;

/// Conformance suite for [`Engine`] implementations.
///
/// Implement [`EngineBuilder`] for the engine under test and call
/// [`EngineTestSuite::run_all_tests`].
pub struct EngineTestSuite;

/// Builder trait for creating Engine instances for testing
pub trait EngineBuilder {
    /// Create a new, empty engine
    fn build(&self) -> Result<Arc<dyn Engine>, Error>;

    /// Directory for staged bulk-load files
    fn scratch_dir(&self) -> &Path;

    /// Clean up any resources after testing
    fn cleanup(&self) -> Result<(), Error>;
}

fn collect(
    reader: &dyn Reader,
    start: &[u8],
    end: &[u8],
) -> Result<Vec<(Vec<u8>, Vec<u8>)>, Error> {
    let mut out = Vec::new();
    reader.scan(start, end, &mut |k, v| {
        out.push((k.to_vec(), v.to_vec()));
        Ok(ControlFlow::Continue(()))
    })?;
    Ok(out)
}

fn kv(
    k: &str,
    v: &str,
) -> (Vec<u8>, Vec<u8>) {
    (k.as_bytes().to_vec(), v.as_bytes().to_vec())
}

impl EngineTestSuite {
    pub fn run_all_tests<B: EngineBuilder>(builder: B) -> Result<(), Error> {
        Self::test_empty_engine(builder.build()?)?;
        Self::test_point_writes(builder.build()?)?;
        Self::test_scan_order_and_early_stop(builder.build()?)?;
        Self::test_clear_raw_range(builder.build()?)?;
        Self::test_range_key_fragments(builder.build()?)?;
        Self::test_snapshot_isolation(builder.build()?)?;
        Self::test_ingest_applies_deletions_first(builder.build()?, builder.scratch_dir())?;
        Self::test_ingest_multiple_files(builder.build()?, builder.scratch_dir())?;

        builder.cleanup()?;
        Ok(())
    }

    fn test_empty_engine(engine: Arc<dyn Engine>) -> Result<(), Error> {
        assert_eq!(engine.get(b"a")?, None);
        assert!(collect(engine.as_ref(), b"", b"\xff")?.is_empty());
        assert_eq!(engine.last_key_in_span(b"", b"\xff")?, None);
        assert!(engine.range_keys(b"", b"\xff")?.is_empty());
        engine.flush()?;
        Ok(())
    }

    fn test_point_writes(engine: Arc<dyn Engine>) -> Result<(), Error> {
        let mut batch = WriteBatch::new();
        batch.put(b"a", b"1")?;
        batch.put(b"b", b"2")?;
        batch.put(b"a", b"3")?;
        batch.clear(b"b")?;
        engine.commit(batch)?;

        assert_eq!(engine.get(b"a")?, Some(b"3".to_vec()));
        assert_eq!(engine.get(b"b")?, None);
        Ok(())
    }

    fn test_scan_order_and_early_stop(engine: Arc<dyn Engine>) -> Result<(), Error> {
        let mut batch = WriteBatch::new();
        for k in ["d", "b", "a", "c", "e"] {
            batch.put(k.as_bytes(), k.as_bytes())?;
        }
        engine.commit(batch)?;

        assert_eq!(
            collect(engine.as_ref(), b"b", b"e")?,
            vec![kv("b", "b"), kv("c", "c"), kv("d", "d")]
        );
        assert_eq!(engine.last_key_in_span(b"a", b"e")?, Some(b"d".to_vec()));
        assert!(collect(engine.as_ref(), b"e", b"b")?.is_empty());

        let mut seen = 0;
        engine.scan(b"a", b"z", &mut |_, _| {
            seen += 1;
            Ok(if seen == 2 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            })
        })?;
        assert_eq!(seen, 2);
        Ok(())
    }

    fn test_clear_raw_range(engine: Arc<dyn Engine>) -> Result<(), Error> {
        let mut batch = WriteBatch::new();
        for k in ["a", "b", "c", "d"] {
            batch.put(k.as_bytes(), b"v")?;
        }
        batch.put_range_key(b"a", b"d", b"rk")?;
        engine.commit(batch)?;

        let mut batch = WriteBatch::new();
        batch.clear_raw_range(b"b", b"d", true, false)?;
        engine.commit(batch)?;
        assert_eq!(collect(engine.as_ref(), b"a", b"z")?, vec![kv("a", "v"), kv("d", "v")]);
        assert_eq!(engine.range_keys(b"a", b"z")?.len(), 1);

        let mut batch = WriteBatch::new();
        batch.clear_raw_range(b"a", b"z", false, true)?;
        engine.commit(batch)?;
        assert!(engine.range_keys(b"a", b"z")?.is_empty());
        assert_eq!(collect(engine.as_ref(), b"a", b"z")?.len(), 2);
        Ok(())
    }

    fn test_range_key_fragments(engine: Arc<dyn Engine>) -> Result<(), Error> {
        let mut batch = WriteBatch::new();
        batch.put_range_key(b"a", b"f", b"x")?;
        engine.commit(batch)?;

        let mut batch = WriteBatch::new();
        batch.clear_range_key(b"b", b"d")?;
        engine.commit(batch)?;

        let frags = engine.range_keys(b"", b"z")?;
        let bounds: Vec<(Vec<u8>, Vec<u8>)> = frags.iter().map(|rk| (rk.start.clone(), rk.end.clone())).collect();
        assert_eq!(bounds, vec![kv("a", "b"), kv("d", "f")]);
        assert!(frags.iter().all(|rk| rk.value == b"x"));

        // Unclipped fragments overlapping the query span.
        let frags = engine.range_keys(b"e", b"g")?;
        assert_eq!(frags.len(), 1);
        assert_eq!(frags[0].start, b"d".to_vec());
        Ok(())
    }

    fn test_snapshot_isolation(engine: Arc<dyn Engine>) -> Result<(), Error> {
        let mut batch = WriteBatch::new();
        batch.put(b"k", b"old")?;
        engine.commit(batch)?;

        let snap = engine.new_snapshot()?;

        let mut batch = WriteBatch::new();
        batch.put(b"k", b"new")?;
        batch.put(b"k2", b"v")?;
        engine.commit(batch)?;

        assert_eq!(snap.get(b"k")?, Some(b"old".to_vec()));
        assert_eq!(snap.get(b"k2")?, None);
        assert_eq!(engine.get(b"k")?, Some(b"new".to_vec()));
        Ok(())
    }

    fn test_ingest_applies_deletions_first(
        engine: Arc<dyn Engine>,
        dir: &Path,
    ) -> Result<(), Error> {
        let mut batch = WriteBatch::new();
        batch.put(b"a", b"stale")?;
        batch.put(b"b", b"stale")?;
        batch.put(b"c", b"outside")?;
        engine.commit(batch)?;

        let mut w = SstWriter::new();
        w.clear_raw_range(b"a", b"c", true, true)?;
        w.put(b"a", b"fresh")?;
        let sst = w.finish()?;
        let path = dir.join("deletions_first.sst");
        crate::file_io::write_file(&path, &sst.data)?;

        let stats = engine.ingest_external_files(&[path])?;
        assert_eq!(stats.files, 1);
        assert_eq!(stats.point_keys, 1);
        assert_eq!(stats.range_deletions, 1);

        assert_eq!(
            collect(engine.as_ref(), b"a", b"z")?,
            vec![kv("a", "fresh"), kv("c", "outside")]
        );
        Ok(())
    }

    fn test_ingest_multiple_files(
        engine: Arc<dyn Engine>,
        dir: &Path,
    ) -> Result<(), Error> {
        let mut paths = Vec::new();
        for (i, (start, end)) in [("a", "m"), ("m", "z")].into_iter().enumerate() {
            let mut w = SstWriter::new();
            w.clear_raw_range(start.as_bytes(), end.as_bytes(), true, false)?;
            w.put(start.as_bytes(), b"v")?;
            let path = dir.join(format!("multi-{i}.sst"));
            crate::file_io::write_file(&path, &w.finish()?.data)?;
            paths.push(path);
        }

        let stats = engine.ingest_external_files(&paths)?;
        assert_eq!(stats.files, 2);
        assert_eq!(collect(engine.as_ref(), b"a", b"z")?, vec![kv("a", "v"), kv("m", "v")]);
        Ok(())
    }
}
