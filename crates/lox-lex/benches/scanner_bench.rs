//! Scanner benchmarks.
//!
//! Run with: `cargo bench --package lox-lex`

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use lox_lex::{Scanner, TokenKind};

fn token_count(source: &str) -> usize {
    let mut scanner = Scanner::new(source);
    let mut count = 0;
    while scanner.next_token().kind != TokenKind::Eof {
        count += 1;
    }
    count
}

fn bench_scanner(c: &mut Criterion) {
    let mut group = c.benchmark_group("scanner");

    let simple = "var x = 42;";
    let program = r#"
        fun fib(n) {
            if (n < 2) return n;
            return fib(n - 1) + fib(n - 2);
        }

        class Point {
            init(x, y) {
                this.x = x;
                this.y = y;
            }

            length() {
                return this.x * this.x + this.y * this.y;
            }
        }

        var p = Point(3, 4);
        print p.length();
        print fib(10) == 55 and "ok" or "bad";
    "#;

    group.throughput(Throughput::Bytes(program.len() as u64));

    group.bench_function("simple_var", |b| {
        b.iter(|| token_count(black_box(simple)))
    });

    group.bench_function("class_and_function", |b| {
        b.iter(|| token_count(black_box(program)))
    });

    group.finish();
}

criterion_group!(benches, bench_scanner);
criterion_main!(benches);
