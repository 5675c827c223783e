use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use zero_mysql_wire::protocol::row::RowFormat;
use zero_mysql_wire::{Field, Row, SqlType, Value};

fn fields() -> Vec<Field> {
    vec![
        Field::new("id", SqlType::Int32),
        Field::new("user_id", SqlType::Uint64),
        Field::new("title", SqlType::Varchar),
        Field::new("body", SqlType::Text),
        Field::new("created_at", SqlType::Datetime),
        Field::new("score", SqlType::Float64),
    ]
}

fn row(i: i32) -> Row {
    vec![
        Value::int32(i),
        Value::uint64(i as u64 * 7),
        Value::varchar("Lorem ipsum dolor sit amet"),
        if i % 3 == 0 {
            Value::NULL
        } else {
            Value::new(SqlType::Text, "consectetur adipiscing elit, sed do eiusmod tempor")
        },
        Value::new(SqlType::Datetime, "2024-03-15 12:34:56"),
        Value::float64(f64::from(i) / 3.0),
    ]
}

fn bench_row_codec(c: &mut Criterion) {
    let fields = fields();
    let rows: Vec<Row> = (0..1000).map(row).collect();

    let mut group = c.benchmark_group("row_codec");
    for format in [RowFormat::Text, RowFormat::Binary] {
        let mut out = Vec::new();
        group.bench_with_input(
            BenchmarkId::new("write", format!("{format:?}")),
            &rows,
            |b, rows| {
                b.iter(|| {
                    for row in rows {
                        out.clear();
                        format.write_row(&mut out, row, &fields).unwrap();
                        black_box(&out);
                    }
                })
            },
        );

        let payloads: Vec<Vec<u8>> = rows
            .iter()
            .map(|row| {
                let mut out = Vec::new();
                format.write_row(&mut out, row, &fields).unwrap();
                out
            })
            .collect();
        group.bench_with_input(
            BenchmarkId::new("read", format!("{format:?}")),
            &payloads,
            |b, payloads| {
                b.iter(|| {
                    for payload in payloads {
                        black_box(format.read_row(payload, &fields).unwrap());
                    }
                })
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_row_codec);
criterion_main!(benches);
