use std::{sync::Arc, thread};

use tempfile::tempdir;

use monovm::{
    config::CONTAINERS_MAP_FILENAME,
    sandbox::{find_slice_index_str, ContainersMap},
    MonovmError,
};

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[test_log::test]
fn test_containers_map_add_is_idempotent() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let map = ContainersMap::new(dir.path());

    map.add("12345", "67890")?;
    let once = std::fs::read_to_string(dir.path().join(CONTAINERS_MAP_FILENAME))?;

    map.add("12345", "67890")?;
    let twice = std::fs::read_to_string(dir.path().join(CONTAINERS_MAP_FILENAME))?;

    assert_eq!(once, twice);
    assert_eq!(map.fetch()?["12345"], vec!["67890".to_string()]);

    map.delete("12345", "67890")?;
    assert!(map.fetch()?.is_empty());

    map.delete("12345", "67890")?;
    assert!(map.fetch()?.is_empty());

    Ok(())
}

#[test_log::test]
fn test_containers_map_concurrent_writers() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let map = Arc::new(ContainersMap::new(dir.path()));

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let map = Arc::clone(&map);
            thread::spawn(move || map.add("shared", &format!("sandbox-{i}")))
        })
        .collect();

    for handle in handles {
        handle
            .join()
            .map_err(|_| anyhow::anyhow!("writer panicked"))??;
    }

    let fetched = map.fetch()?;
    let sandboxes = &fetched["shared"];
    assert_eq!(sandboxes.len(), 8);
    for i in 0..8 {
        assert_ne!(find_slice_index_str(sandboxes, &format!("sandbox-{i}")), -1);
    }

    Ok(())
}

#[test]
fn test_containers_map_requires_ids() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let map = ContainersMap::new(dir.path());

    assert!(matches!(map.add("", "sb"), Err(MonovmError::NeedContainerId)));
    assert!(matches!(map.delete("ctr", ""), Err(MonovmError::NeedSandboxId)));

    Ok(())
}
