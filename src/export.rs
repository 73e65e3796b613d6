use super::*;

/// Errors that can occur when exporting snapshots.
#[derive(Debug, Error)]
pub enum ExportError {
  #[error("failed to encode snapshot as pprof: {0}")]
  Encode(#[from] prost::EncodeError),
  #[error("i/o error during export: {0}")]
  Io(#[from] io::Error),
  #[error("failed to encode snapshot as json: {0}")]
  Json(#[from] serde_json::Error),
}

struct StringTable {
  entries: Vec<String>,
  index: HashMap<String, i64>,
}

impl StringTable {
  fn intern(&mut self, value: &str) -> i64 {
    if let Some(index) = self.index.get(value) {
      return *index;
    }

    let index = i64::try_from(self.entries.len()).unwrap_or(i64::MAX);

    self.entries.push(value.to_string());
    self.index.insert(value.to_string(), index);

    index
  }

  fn into_vec(self) -> Vec<String> {
    self.entries
  }

  fn new() -> Self {
    Self {
      entries: vec![String::new()],
      index: HashMap::from([(String::new(), 0)]),
    }
  }
}

/// Accumulates samples whose locations are raw return addresses.
struct ProfileBuilder {
  location_ids: HashMap<usize, u64>,
  locations: Vec<Location>,
  sample_type: Vec<ValueType>,
  samples: Vec<Sample>,
  strings: StringTable,
}

impl ProfileBuilder {
  fn new(sample_types: &[(&str, &str)]) -> Self {
    let mut strings = StringTable::new();
    let sample_type = sample_types
      .iter()
      .map(|(ty, unit)| ValueType {
        ty: strings.intern(ty),
        unit: strings.intern(unit),
      })
      .collect();

    Self {
      location_ids: HashMap::new(),
      locations: Vec::new(),
      sample_type,
      samples: Vec::new(),
      strings,
    }
  }

  fn add_sample(&mut self, stack: &[usize], value: Vec<i64>) {
    let mut location_id = Vec::with_capacity(stack.len());

    for &address in stack {
      let next_id = self.locations.len() as u64 + 1;
      let id = *self.location_ids.entry(address).or_insert_with(|| {
        self.locations.push(Location {
          id: next_id,
          mapping_id: 0,
          address: address as u64,
          is_folded: false,
        });
        next_id
      });
      location_id.push(id);
    }

    self.samples.push(Sample { location_id, value });
  }

  fn finish(mut self, default_sample_type: &str) -> Profile {
    let default_sample_type = self.strings.intern(default_sample_type);
    let period_type = self.sample_type.first().copied();

    Profile {
      sample_type: self.sample_type,
      sample: self.samples,
      location: self.locations,
      string_table: self.strings.into_vec(),
      drop_frames: 0,
      keep_frames: 0,
      time_nanos: 0,
      duration_nanos: 0,
      period_type,
      period: 1,
      comment: Vec::new(),
      default_sample_type,
    }
  }
}

pub fn build_mem_profile(snapshot: &MemSnapshot) -> Profile {
  let mut builder = ProfileBuilder::new(&[
    ("alloc_objects", "count"),
    ("alloc_space", "bytes"),
    ("inuse_objects", "count"),
    ("inuse_space", "bytes"),
  ]);

  for record in snapshot.records() {
    builder.add_sample(
      record.stack(),
      vec![
        record.alloc_objects,
        record.alloc_bytes,
        record.in_use_objects(),
        record.in_use_bytes(),
      ],
    );
  }

  builder.finish("inuse_space")
}

pub fn build_block_profile(snapshot: &BlockSnapshot) -> Profile {
  let mut builder =
    ProfileBuilder::new(&[("contentions", "count"), ("delay", "cycles")]);

  for record in snapshot.records() {
    builder.add_sample(record.stack(), vec![record.count, record.cycles]);
  }

  builder.finish("delay")
}
