//! The subset of the pprof `profile.proto` schema that profile export emits.
//! Locations carry raw addresses only; symbolization is left to `pprof`
//! and the binary.

#[derive(Clone, PartialEq, prost::Message)]
pub struct Profile {
  #[prost(message, repeated, tag = "1")]
  pub sample_type: Vec<ValueType>,
  #[prost(message, repeated, tag = "2")]
  pub sample: Vec<Sample>,
  #[prost(message, repeated, tag = "4")]
  pub location: Vec<Location>,
  #[prost(string, repeated, tag = "6")]
  pub string_table: Vec<String>,
  #[prost(int64, tag = "7")]
  pub drop_frames: i64,
  #[prost(int64, tag = "8")]
  pub keep_frames: i64,
  #[prost(int64, tag = "9")]
  pub time_nanos: i64,
  #[prost(int64, tag = "10")]
  pub duration_nanos: i64,
  #[prost(message, optional, tag = "11")]
  pub period_type: Option<ValueType>,
  #[prost(int64, tag = "12")]
  pub period: i64,
  #[prost(int64, repeated, tag = "13")]
  pub comment: Vec<i64>,
  #[prost(int64, tag = "14")]
  pub default_sample_type: i64,
}

#[derive(Clone, Copy, PartialEq, prost::Message)]
pub struct ValueType {
  #[prost(int64, tag = "1")]
  pub ty: i64,
  #[prost(int64, tag = "2")]
  pub unit: i64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Sample {
  #[prost(uint64, repeated, tag = "1")]
  pub location_id: Vec<u64>,
  #[prost(int64, repeated, tag = "2")]
  pub value: Vec<i64>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Location {
  #[prost(uint64, tag = "1")]
  pub id: u64,
  #[prost(uint64, tag = "2")]
  pub mapping_id: u64,
  #[prost(uint64, tag = "3")]
  pub address: u64,
  #[prost(bool, tag = "5")]
  pub is_folded: bool,
}
