use option_downloads::query::{ColumnDescriptor, QueryError, QueryOutcome, Value};
use option_downloads::downloader::to_html;
use option_downloads::table::{
    ColumnType, MAX_FIXED_POINT_DIGITS, ResultTable, fixed_point_digits,
};
use serde_json::json;

fn quote_table() -> ResultTable {
    let mut table = ResultTable::new();
    table
        .populate(
            vec![
                ColumnDescriptor::new("id", "INTEGER"),
                ColumnDescriptor::new("putCall", "TEXT"),
                ColumnDescriptor::new("px", "REAL"),
                ColumnDescriptor::new("date_", "TEXT"),
            ],
            vec![
                vec![
                    Value::Int(1),
                    Value::from("P"),
                    Value::Real(10.5),
                    Value::from("2024-01-05 00:00:00"),
                ],
                vec![
                    Value::Int(2),
                    Value::from("C"),
                    Value::Real(20.25),
                    Value::from("2024-01-06"),
                ],
            ],
        )
        .unwrap();
    table
}

#[test]
fn populate_sets_default_metadata() {
    println!("Test 1: default column metadata");
    let table = quote_table();

    assert!(table.is_valid());
    assert_eq!(table.column_count(), 4);
    assert_eq!(table.row_count(), 2);
    assert_eq!(table.column_name(0), Some("id"));

    let types: Vec<ColumnType> = table.columns().iter().map(|c| c.column_type).collect();
    assert_eq!(
        types,
        vec![ColumnType::Int, ColumnType::String, ColumnType::Real, ColumnType::String]
    );
    for (i, column) in table.columns().iter().enumerate() {
        assert_eq!(column.index, i);
        assert_eq!(column.display_name, column.source_name);
        assert!(column.width.is_none());
        assert!(column.value_map.is_none());
        assert!(column.format.is_none());
    }
    println!("Display names default to source names - PASS\n");
}

#[test]
fn setters_reject_out_of_range_columns() {
    println!("Test 2: out of range setters");
    let mut table = quote_table();

    assert!(!table.set_column_name(4, "X"));
    assert!(!table.set_column_type(9, ColumnType::Real));
    assert!(!table.set_column_width(4, "10%"));
    assert!(!table.set_column_format(4, "%.2f"));
    assert!(!table.set_column_labels(4, [("P", "Put")]));
    assert!(!table.set_column_value_map(4, &json!({"P": "Put"})));

    let names: Vec<&str> = table.columns().iter().map(|c| c.display_name.as_str()).collect();
    assert_eq!(names, vec!["id", "putCall", "px", "date_"]);
    println!("No column changed - PASS\n");

    assert!(table.set_column_name(1, "Put/Call"));
    assert!(table.set_column_width(1, "15%"));
    assert!(table.set_column_type(0, ColumnType::String));
    assert_eq!(table.column_name(1), Some("Put/Call"));
    assert_eq!(table.column(1).and_then(|c| c.width.as_deref()), Some("15%"));
    assert_eq!(table.column(0).map(|c| c.column_type), Some(ColumnType::String));
}

#[test]
fn value_map_from_json_object() {
    let mut table = quote_table();

    assert!(table.set_column_value_map(1, &json!({"P": "Put", "C": "Call"})));
    let column = table.column(1).unwrap();
    assert_eq!(column.substitute(&Value::from("P")), Some("Put"));
    assert_eq!(column.substitute(&Value::from("X")), None);

    // A non-object leaves the old map alone
    assert!(!table.set_column_value_map(1, &json!(["P", "Put"])));
    assert_eq!(table.column(1).unwrap().substitute(&Value::from("C")), Some("Call"));

    // Numeric keys match the raw value's text
    assert!(table.set_column_labels(0, [(1, "one")]));
    assert_eq!(table.column(0).unwrap().html_text(&Value::Int(1)), "one");
    assert_eq!(table.column(0).unwrap().csv_text(&Value::Int(2)), "2");
    println!("Value maps substitute matching raw values - PASS");
}

#[test]
fn format_applies_to_html_text_only() {
    let mut table = quote_table();
    assert!(table.set_column_format(2, "%.2f"));

    let column = table.column(2).unwrap();
    assert_eq!(column.html_text(&Value::Real(10.5)), "10.50");
    assert_eq!(column.csv_text(&Value::Real(10.5)), "10.5");
    assert_eq!(column.html_text(&Value::Null), "");

    // A format this table does not understand prints the raw value
    assert!(table.set_column_format(2, "%d items"));
    assert_eq!(table.column(2).unwrap().html_text(&Value::Real(10.5)), "10.5");

    assert_eq!(fixed_point_digits("%.12f"), Some(12));
    assert_eq!(fixed_point_digits("%0.3f"), Some(3));
    assert_eq!(fixed_point_digits("%f"), Some(6));
    assert_eq!(fixed_point_digits("%s"), None);
}

#[test]
fn oversized_precision_prints_raw_value() {
    println!("Test 3: precision beyond the supported digits");
    let mut table = ResultTable::new();
    table
        .populate(vec![ColumnDescriptor::new("px", "REAL")], vec![vec![Value::Real(1.5)]])
        .unwrap();

    assert!(table.set_column_format(0, "%.70000f"));
    let html = to_html(&table);
    assert!(html.contains("<td class=\"real\">1.5</td>"));

    assert!(table.set_column_format(0, "%.99999999999999999999999f"));
    assert!(to_html(&table).contains("<td class=\"real\">1.5</td>"));

    assert_eq!(fixed_point_digits("%.32f"), Some(MAX_FIXED_POINT_DIGITS));
    assert_eq!(fixed_point_digits("%.33f"), None);
    assert_eq!(fixed_point_digits("%.70000f"), None);
    println!("Rendered without formatting - PASS\n");
}

#[test]
fn cells_can_be_read_and_replaced() {
    let mut table = quote_table();

    assert_eq!(table.get_cell(1, 2), Some(&Value::Real(20.25)));
    assert_eq!(table.get_cell(2, 0), None);
    assert_eq!(table.get_cell(0, 4), None);

    assert!(table.set_cell(0, 2, 11.0));
    assert_eq!(table.get_cell(0, 2), Some(&Value::Real(11.0)));
    assert!(!table.set_cell(5, 0, 1i64));
    assert!(!table.set_cell(0, 7, "x"));
}

#[test]
fn reformat_dates_keeps_calendar_date() {
    let mut table = quote_table();
    table.set_cell(1, 3, "not a date");

    assert!(table.reformat_dates(3));
    assert_eq!(table.get_cell(0, 3), Some(&Value::from("2024-01-05")));
    assert_eq!(table.get_cell(1, 3), Some(&Value::from("not a date")));
    assert!(!table.reformat_dates(10));
    println!("Datetime reduced to date, other text untouched - PASS");
}

#[test]
fn populate_only_once() {
    let mut table = quote_table();
    let err = table.populate(vec![ColumnDescriptor::new("x", "TEXT")], vec![]);
    assert!(matches!(err, Err(QueryError::AlreadyPopulated)));
    assert_eq!(table.column_count(), 4);

    let err = table.populate_from(Ok(QueryOutcome::default()));
    assert!(matches!(err, Err(QueryError::AlreadyPopulated)));
}

#[test]
fn ragged_rows_are_rejected() {
    let mut table = ResultTable::new();
    let result = table.populate(
        vec![ColumnDescriptor::new("a", "INTEGER"), ColumnDescriptor::new("b", "INTEGER")],
        vec![vec![Value::Int(1), Value::Int(2)], vec![Value::Int(3)]],
    );

    assert!(matches!(
        result,
        Err(QueryError::Shape {
            row: 1,
            expected: 2,
            found: 1
        })
    ));
    assert!(table.is_populated());
    assert!(!table.is_valid());
    assert_eq!(table.row_count(), 0);
    assert!(table.error_message().is_some());
}

#[test]
fn failed_query_is_remembered() {
    let mut table = ResultTable::new();
    let failure = QueryError::Execution("no such table: eqprice".into());
    let result = table.populate_from(Err(failure));

    assert!(result.is_err());
    assert!(!table.is_valid());
    assert_eq!(table.error_message(), Some("no such table: eqprice"));
    assert_eq!(table.column_count(), 0);
    assert_eq!(table.row_count(), 0);
}

#[test]
fn unpopulated_table_is_not_valid() {
    let table = ResultTable::new();
    assert!(!table.is_populated());
    assert!(!table.is_valid());
    assert!(table.shows_row_numbers());
    assert_eq!(table.csv_filename, "results.csv");
}

#[test]
fn column_types_from_declared_types() {
    assert_eq!(ColumnType::from_source_type("INTEGER"), ColumnType::Int);
    assert_eq!(ColumnType::from_source_type("bigint"), ColumnType::Int);
    assert_eq!(ColumnType::from_source_type("DOUBLE PRECISION"), ColumnType::Real);
    assert_eq!(ColumnType::from_source_type("decimal(10,2)"), ColumnType::Real);
    assert_eq!(ColumnType::from_source_type("VARCHAR"), ColumnType::String);
    assert_eq!("real".parse::<ColumnType>(), Ok(ColumnType::Real));
    assert!("blob".parse::<ColumnType>().is_err());
}
