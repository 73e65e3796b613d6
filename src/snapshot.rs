use super::*;

/// Owned copy of the memory profile, taken by growing a buffer until
/// `Profiler::mem_profile` reports a complete export.
#[derive(Debug, Clone, Default)]
pub struct MemSnapshot {
  collection_cycles: u64,
  records: Vec<MemProfileRecord>,
}

impl Serialize for MemSnapshot {
  fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
  where
    S: Serializer,
  {
    let mut state = serializer.serialize_struct("MemSnapshot", 4)?;
    state.serialize_field("collection_cycles", &self.collection_cycles)?;
    state.serialize_field("in_use_bytes", &self.in_use_bytes())?;
    state.serialize_field("in_use_objects", &self.in_use_objects())?;
    state.serialize_field("records", &self.records)?;
    state.end()
  }
}

impl MemSnapshot {
  /// Completed collection cycles at the time of the snapshot.
  #[must_use]
  pub fn collection_cycles(&self) -> u64 {
    self.collection_cycles
  }

  /// Serialize the snapshot to JSON using the provided writer.
  ///
  /// # Errors
  ///
  /// Returns an error if serialization to JSON fails.
  pub fn export_json<W: Write>(&self, writer: W) -> Result<(), ExportError> {
    serde_json::to_writer(writer, self)?;
    Ok(())
  }

  /// Serialize the snapshot to the pprof proto format.
  ///
  /// # Errors
  ///
  /// Returns an error if the snapshot cannot be encoded or written to the
  /// provided writer.
  pub fn export_pprof<W: Write>(&self, mut writer: W) -> Result<(), ExportError> {
    let profile = build_mem_profile(self);
    let mut buffer = Vec::with_capacity(4096);
    profile.encode(&mut buffer)?;
    writer.write_all(&buffer)?;
    Ok(())
  }

  #[must_use]
  pub fn in_use_bytes(&self) -> i64 {
    self
      .records
      .iter()
      .fold(0i64, |sum, record| sum.saturating_add(record.in_use_bytes()))
  }

  #[must_use]
  pub fn in_use_objects(&self) -> i64 {
    self
      .records
      .iter()
      .fold(0i64, |sum, record| sum.saturating_add(record.in_use_objects()))
  }

  #[must_use]
  pub(crate) fn new(
    records: Vec<MemProfileRecord>,
    collection_cycles: u64,
  ) -> Self {
    Self {
      collection_cycles,
      records,
    }
  }

  #[must_use]
  pub fn records(&self) -> &[MemProfileRecord] {
    &self.records
  }
}

/// Owned copy of the blocking profile.
#[derive(Debug, Clone, Default)]
pub struct BlockSnapshot {
  records: Vec<BlockProfileRecord>,
}

impl Serialize for BlockSnapshot {
  fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
  where
    S: Serializer,
  {
    let mut state = serializer.serialize_struct("BlockSnapshot", 3)?;
    state.serialize_field("count", &self.total_count())?;
    state.serialize_field("cycles", &self.total_cycles())?;
    state.serialize_field("records", &self.records)?;
    state.end()
  }
}

impl BlockSnapshot {
  /// Serialize the snapshot to JSON using the provided writer.
  ///
  /// # Errors
  ///
  /// Returns an error if serialization to JSON fails.
  pub fn export_json<W: Write>(&self, writer: W) -> Result<(), ExportError> {
    serde_json::to_writer(writer, self)?;
    Ok(())
  }

  /// Serialize the snapshot to the pprof proto format.
  ///
  /// # Errors
  ///
  /// Returns an error if the snapshot cannot be encoded or written to the
  /// provided writer.
  pub fn export_pprof<W: Write>(&self, mut writer: W) -> Result<(), ExportError> {
    let profile = build_block_profile(self);
    let mut buffer = Vec::with_capacity(4096);
    profile.encode(&mut buffer)?;
    writer.write_all(&buffer)?;
    Ok(())
  }

  #[must_use]
  pub(crate) fn new(records: Vec<BlockProfileRecord>) -> Self {
    Self { records }
  }

  #[must_use]
  pub fn records(&self) -> &[BlockProfileRecord] {
    &self.records
  }

  #[must_use]
  pub fn total_count(&self) -> i64 {
    self
      .records
      .iter()
      .fold(0i64, |sum, record| sum.saturating_add(record.count))
  }

  #[must_use]
  pub fn total_cycles(&self) -> i64 {
    self
      .records
      .iter()
      .fold(0i64, |sum, record| sum.saturating_add(record.cycles))
  }
}
