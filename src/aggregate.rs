//! Per-dataset metadata aggregation.
//!
//! [`DatasetAggregator::aggregate`] runs five catalog lookups for one dataset
//! and merges them into a [`ResourceDetail`]:
//!
//! | # | View | Scope | Contributes |
//! |---|------|-------|-------------|
//! | 1 | `SCHEMATA` | region | dataset DDL, dataset description flag |
//! | 2 | `TABLES` | dataset | table list, kind, DDL, description, completeness |
//! | 3 | `TABLE_STORAGE` | region | row count, logical / billable GiB |
//! | 4 | `PARTITIONS` | dataset | latest modification time |
//! | 5 | `TABLE_OPTIONS` | dataset | partitioning / clustering options |
//!
//! Lookup 1 is best effort: the dataset was just discovered, so a failure
//! there only means "no description". A failure in any of lookups 2 to 5
//! fails the whole dataset; the orchestrator drops it and moves on.
//! Statistics that are simply absent for a table leave the matching
//! [`TableRecord`] fields as `None`.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::ddl;
use crate::error::AnalyzerResult;
use crate::models::{ResourceDetail, TableKind, TableRecord};
use crate::query::{validate_dataset_name, validate_project_id, validate_region, MetadataFacade};

#[derive(Debug, Deserialize)]
struct SchemaDdlRow {
    #[serde(default)]
    ddl: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TableRow {
    table_name: String,
    table_type: TableKind,
    #[serde(default)]
    ddl: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StorageRow {
    table_name: String,
    #[serde(default)]
    total_rows: Option<i64>,
    #[serde(default)]
    total_logical_bytes: Option<i64>,
    #[serde(default)]
    total_physical_bytes: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct PartitionRow {
    table_name: String,
    #[serde(default)]
    last_modified_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct OptionRow {
    table_name: String,
    option_name: String,
    #[serde(default)]
    option_value: Option<String>,
}

/// Collects [`ResourceDetail`]s through a [`MetadataFacade`].
pub struct DatasetAggregator {
    facade: MetadataFacade,
}

impl DatasetAggregator {
    pub fn new(facade: MetadataFacade) -> Self {
        Self { facade }
    }

    /// Gather everything known about `dataset` in `project_id`.
    ///
    /// `region` selects the `region-<name>` views used by lookups 1 and 3.
    pub async fn aggregate(
        &self,
        project_id: &str,
        dataset: &str,
        region: &str,
    ) -> AnalyzerResult<ResourceDetail> {
        let project = validate_project_id(project_id)?;
        let dataset = validate_dataset_name(dataset)?;
        let region = validate_region(region)?;

        info!(%dataset, %region, "fetching dataset details");

        let dataset_ddl = self.dataset_ddl(project, dataset, region).await;
        let has_dataset_description = ddl::has_description(&dataset_ddl);

        let mut tables = self.tables(project, dataset).await?;

        let storage: Vec<StorageRow> = self
            .facade
            .fetch(&format!(
                "SELECT table_name, total_rows, total_logical_bytes, total_physical_bytes \
                 FROM `{project}`.`region-{region}`.INFORMATION_SCHEMA.TABLE_STORAGE \
                 WHERE table_schema = '{dataset}'"
            ))
            .await?;
        for row in storage {
            if let Some(table) = tables.get_mut(&row.table_name) {
                table.rows = row.total_rows;
                table.logical_gb = Some(ddl::bytes_to_gib(row.total_logical_bytes));
                table.billable_gb = Some(ddl::bytes_to_gib(row.total_physical_bytes));
            }
        }

        let partitions: Vec<PartitionRow> = self
            .facade
            .fetch(&format!(
                "SELECT table_name, MAX(last_modified_time) AS last_modified_time \
                 FROM `{project}`.{dataset}.INFORMATION_SCHEMA.PARTITIONS \
                 GROUP BY table_name"
            ))
            .await?;
        for row in partitions {
            if let Some(table) = tables.get_mut(&row.table_name) {
                table.last_modified = row.last_modified_time;
            }
        }

        let options: Vec<OptionRow> = self
            .facade
            .fetch(&format!(
                "SELECT table_name, option_name, option_value \
                 FROM `{project}`.{dataset}.INFORMATION_SCHEMA.TABLE_OPTIONS"
            ))
            .await?;
        for row in options {
            if let Some(table) = tables.get_mut(&row.table_name) {
                if row.option_name.contains("partition") {
                    table.partitioning_info = row.option_value.clone();
                }
                if row.option_name.contains("clustering") {
                    table.clustering_info = row.option_value;
                }
            }
        }

        debug!(%dataset, tables = tables.len(), "dataset details assembled");

        Ok(ResourceDetail {
            schema_name: dataset.to_string(),
            ddl: dataset_ddl,
            has_dataset_description,
            tables: tables.into_values(),
        })
    }

    async fn dataset_ddl(&self, project: &str, dataset: &str, region: &str) -> String {
        let query = format!(
            "SELECT ddl FROM `{project}`.`region-{region}`.INFORMATION_SCHEMA.SCHEMATA \
             WHERE schema_name = '{dataset}'"
        );
        match self.facade.fetch::<SchemaDdlRow>(&query).await {
            Ok(rows) => rows.into_iter().next().and_then(|r| r.ddl).unwrap_or_default(),
            Err(e) => {
                warn!(%dataset, error = %e, "dataset DDL unavailable, treating as undescribed");
                String::new()
            }
        }
    }

    async fn tables(&self, project: &str, dataset: &str) -> AnalyzerResult<TableMap> {
        let rows: Vec<TableRow> = self
            .facade
            .fetch(&format!(
                "SELECT table_name, table_type, ddl \
                 FROM `{project}`.{dataset}.INFORMATION_SCHEMA.TABLES"
            ))
            .await?;

        let mut tables = TableMap::default();
        for row in rows {
            let ddl = row.ddl.unwrap_or_default();
            let has_table_description = ddl::has_description(&ddl);
            let column_description_completeness =
                ddl::column_completeness(&ddl, has_table_description);
            tables.insert(TableRecord {
                table_name: row.table_name,
                table_type: row.table_type,
                ddl,
                has_table_description,
                column_description_completeness,
                rows: None,
                logical_gb: None,
                billable_gb: None,
                last_modified: None,
                partitioning_info: None,
                clustering_info: None,
            });
        }
        Ok(tables)
    }
}

/// Tables keyed by name, remembering catalog order.
#[derive(Default)]
struct TableMap {
    index: HashMap<String, usize>,
    records: Vec<TableRecord>,
}

impl TableMap {
    /// Insert, replacing an earlier record with the same name in place.
    fn insert(&mut self, record: TableRecord) {
        match self.index.get(&record.table_name) {
            Some(&i) => self.records[i] = record,
            None => {
                self.index
                    .insert(record.table_name.clone(), self.records.len());
                self.records.push(record);
            }
        }
    }

    fn get_mut(&mut self, name: &str) -> Option<&mut TableRecord> {
        let i = *self.index.get(name)?;
        self.records.get_mut(i)
    }

    fn len(&self) -> usize {
        self.records.len()
    }

    fn into_values(self) -> Vec<TableRecord> {
        self.records
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AnalyzerError;
    use crate::query::{QueryExecutor, Row};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::{Arc, Mutex};

    /// Answers queries by matching the catalog view named in the SQL.
    struct CatalogStub {
        responses: Vec<(&'static str, Result<Value, &'static str>)>,
        seen: Mutex<Vec<String>>,
    }

    impl CatalogStub {
        fn new(responses: Vec<(&'static str, Result<Value, &'static str>)>) -> Arc<Self> {
            Arc::new(Self {
                responses,
                seen: Mutex::new(vec![]),
            })
        }
    }

    #[async_trait]
    impl QueryExecutor for CatalogStub {
        async fn execute(&self, query: &str) -> AnalyzerResult<Vec<Row>> {
            self.seen.lock().unwrap().push(query.to_string());
            for (view, response) in &self.responses {
                if query.contains(&format!("INFORMATION_SCHEMA.{} ", view))
                    || query.ends_with(&format!("INFORMATION_SCHEMA.{}", view))
                {
                    return match response {
                        Ok(Value::Array(rows)) => Ok(rows
                            .iter()
                            .map(|r| r.as_object().unwrap().clone())
                            .collect()),
                        Ok(_) => Ok(vec![]),
                        Err(cause) => Err(AnalyzerError::query(query, cause)),
                    };
                }
            }
            Ok(vec![])
        }
    }

    fn aggregator(stub: Arc<CatalogStub>) -> DatasetAggregator {
        DatasetAggregator::new(MetadataFacade::new(stub))
    }

    fn full_catalog() -> Vec<(&'static str, Result<Value, &'static str>)> {
        vec![
            (
                "SCHEMATA",
                Ok(json!([{"ddl": "CREATE SCHEMA sales\nOPTIONS(description=\"Sales data\");"}])),
            ),
            (
                "TABLES",
                Ok(json!([
                    {"table_name": "orders", "table_type": "BASE TABLE",
                     "ddl": "CREATE TABLE `p.sales.orders`\n(\n  id INT64 OPTIONS(description=\"k\"),\n  amount NUMERIC,\n  note STRING OPTIONS(description=\"n\")\n)\nOPTIONS(description=\"Orders\");"},
                    {"table_name": "orders_view", "table_type": "VIEW", "ddl": null}
                ])),
            ),
            (
                "TABLE_STORAGE",
                Ok(json!([
                    {"table_name": "orders", "total_rows": 10, "total_logical_bytes": 2147483648i64, "total_physical_bytes": 1073741824i64},
                    {"table_name": "dropped_table", "total_rows": 1, "total_logical_bytes": 1, "total_physical_bytes": 1}
                ])),
            ),
            (
                "PARTITIONS",
                Ok(json!([{"table_name": "orders", "last_modified_time": "2024-01-02T03:04:05+00:00"}])),
            ),
            (
                "TABLE_OPTIONS",
                Ok(json!([
                    {"table_name": "orders", "option_name": "partition_expiration_days", "option_value": "30"},
                    {"table_name": "orders", "option_name": "description", "option_value": "\"x\""}
                ])),
            ),
        ]
    }

    #[tokio::test]
    async fn merges_all_lookups() {
        let stub = CatalogStub::new(full_catalog());
        let detail = aggregator(stub.clone())
            .aggregate("my-project", "sales", "US")
            .await
            .unwrap();

        assert_eq!(detail.schema_name, "sales");
        assert!(detail.has_dataset_description);
        assert_eq!(detail.tables.len(), 2);

        let orders = &detail.tables[0];
        assert_eq!(orders.table_name, "orders");
        assert_eq!(orders.table_type, TableKind::Base);
        assert!(orders.has_table_description);
        // four declarations, three markers of which one is the table's
        assert_eq!(orders.column_description_completeness, 0.5);
        assert_eq!(orders.rows, Some(10));
        assert_eq!(orders.logical_gb, Some(2.0));
        assert_eq!(orders.billable_gb, Some(1.0));
        assert_eq!(
            orders.last_modified.map(|t| t.to_rfc3339()),
            Some("2024-01-02T03:04:05+00:00".to_string())
        );
        assert_eq!(orders.partitioning_info.as_deref(), Some("30"));
        assert!(orders.clustering_info.is_none());

        let view = &detail.tables[1];
        assert_eq!(view.table_type, TableKind::View);
        assert_eq!(view.ddl, "");
        assert!(view.billable_gb.is_none());
        assert!(view.last_modified.is_none());

        let seen = stub.seen.lock().unwrap();
        assert_eq!(seen.len(), 5);
        assert!(seen[0].contains("`my-project`.`region-US`.INFORMATION_SCHEMA.SCHEMATA"));
        assert!(seen[1].contains("`my-project`.sales.INFORMATION_SCHEMA.TABLES"));
    }

    #[tokio::test]
    async fn dataset_ddl_failure_is_tolerated() {
        let mut catalog = full_catalog();
        catalog[0] = ("SCHEMATA", Err("Access Denied"));
        let detail = aggregator(CatalogStub::new(catalog))
            .aggregate("my-project", "sales", "US")
            .await
            .unwrap();
        assert_eq!(detail.ddl, "");
        assert!(!detail.has_dataset_description);
        assert_eq!(detail.tables.len(), 2);
    }

    #[tokio::test]
    async fn later_lookup_failure_fails_the_dataset() {
        for failing in 1..5 {
            let mut catalog = full_catalog();
            let view = catalog[failing].0;
            catalog[failing] = (view, Err("backend error"));
            let result = aggregator(CatalogStub::new(catalog))
                .aggregate("my-project", "sales", "US")
                .await;
            assert!(
                matches!(result, Err(AnalyzerError::Query { .. })),
                "failure in {} should fail the dataset",
                view
            );
        }
    }

    #[tokio::test]
    async fn empty_dataset_is_valid() {
        let stub = CatalogStub::new(vec![]);
        let detail = aggregator(stub)
            .aggregate("my-project", "empty_ds", "EU")
            .await
            .unwrap();
        assert!(detail.tables.is_empty());
        assert!(!detail.has_dataset_description);
    }

    #[tokio::test]
    async fn unsafe_names_never_reach_the_catalog() {
        let stub = CatalogStub::new(full_catalog());
        let result = aggregator(stub.clone())
            .aggregate("my-project", "sales'; --", "US")
            .await;
        assert!(matches!(result, Err(AnalyzerError::InvalidIdentifier(_))));
        assert!(stub.seen.lock().unwrap().is_empty());
    }
}
