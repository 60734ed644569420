#[test]
fn derives_compile() {
    let t = trybuild::TestCases::new();
    t.pass("compile-pass/*.rs");
}
