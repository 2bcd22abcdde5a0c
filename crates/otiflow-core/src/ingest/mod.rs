mod engine;
mod normalizer;
mod parser;
mod pipeline;
mod record;
mod registry;
mod sales;
mod transformer;

pub use engine::{IngestionEngine, LoadReport};
pub use normalizer::{
    normalize_field_name, normalize_record, normalize_table, parse_date_lenient,
    NormalizationStats, CUSTOMER_ID, DELIVERY_DATE, DELIVERY_QTY, IDENTITY_FIELDS, IN_FULL,
    ON_TIME, ORDER_ID, ORDER_QTY, PRODUCT_ID,
};
pub use parser::{
    CompositeDecoder, CsvDecoder, Decoder, FileFormat, RawTable, SpreadsheetDecoder,
    TransformError, TransformResult,
};
pub use pipeline::{IngestPipeline, MissReason, RunOutcome, RunReport, DEFAULT_FETCH_TIMEOUT};
pub use record::{FieldValue, Record};
pub use registry::{RelationHandle, StoredSale, TableRegistry, DEFAULT_ROW_LIMIT, RELATION_PREFIX};
pub use sales::{RecordError, SalesRecord};
pub use transformer::{sample_records, TransformOutput, Transformer};
