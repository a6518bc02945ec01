use proptest::prelude::*;
use internment::Arena;

proptest! {
    #[test]
    fn doesnt_crash(s in "\\PC*") {
        let arena = Arena::new();
        let _ = mmcheck::llvm::parse(&s, &arena);
    }

    #[test]
    fn doesnt_crash_on_tokens(toks in prop::collection::vec(prop_oneof![
        Just("define"), Just("declare"), Just("global"), Just("external"), Just("type"),
        Just("call"), Just("store"), Just("load"), Just("br"), Just("ret"), Just("label"),
        Just("void"), Just("i1"), Just("i64"), Just("mmptr"), Just("mmarrayptr"),
        Just("*"), Just(","), Just("("), Just(")"), Just("{"), Just("}"), Just("["), Just("]"),
        Just("="), Just(":"), Just("x"), Just("%a"), Just("@g"), Just("0"), Just("-1"), Just("null"),
        Just("c\"s\\00\""), Just("entry"),
    ], 0..40)) {
        let s = toks.join(" ");
        let arena = Arena::new();
        let _ = mmcheck::llvm::parse(&s, &arena);
    }
}
