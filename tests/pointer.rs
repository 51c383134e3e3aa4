// SPDX-License-Identifier: BSD-3-Clause
// To debug or develop a test, try `eprintln!("{}", outs.dump_states(&m))`

use funptr::{
    pointer::{self, Options, Outputs},
    InstId, Module, ModuleBuilder, Ty, ValueId,
};

// ------------------------------------------------------------------
// Helpers

fn run(m: &Module) -> Outputs {
    pointer::analysis(m, &Options::default()).unwrap()
}

fn site(m: &Module, call: ValueId) -> InstId {
    m.definition(call).unwrap()
}

fn callees(m: &Module, outs: &Outputs, call: ValueId) -> Vec<String> {
    let mut names: Vec<String> = outs
        .callees(site(m, call))
        .unwrap()
        .iter()
        .map(|f| m.function(*f).name().to_string())
        .collect();
    names.sort();
    names
}

// ------------------------------------------------------------------
// Tests

#[test]
fn direct_call() {
    let mut mb = ModuleBuilder::new();
    let f = mb.declare("f", &[], Ty::Void).unwrap();
    let g = mb.declare("g", &[], Ty::Void).unwrap();
    let main = mb.declare("main", &[], Ty::Void).unwrap();
    let (fv, gv) = (mb.function_value(f), mb.function_value(g));
    let call = {
        let mut body = mb.body(main).unwrap();
        let entry = body.block("entry");
        let slot = body.alloca(entry);
        body.store(entry, gv, slot);
        let call = body.call(entry, fv, vec![]);
        body.ret(entry, None);
        call
    };
    let m = mb.finish().unwrap();
    assert_eq!(callees(&m, &run(&m), call), ["f"]);
}

#[test]
fn indirect_through_phi() {
    let mut mb = ModuleBuilder::new();
    let f = mb.declare("f", &[], Ty::Void).unwrap();
    let g = mb.declare("g", &[], Ty::Void).unwrap();
    let main = mb.declare("main", &[], Ty::Void).unwrap();
    let (fv, gv) = (mb.function_value(f), mb.function_value(g));
    let call = {
        let mut body = mb.body(main).unwrap();
        let entry = body.block("entry");
        let left = body.block("left");
        let right = body.block("right");
        let join = body.block("join");
        body.br(entry, &[left, right]);
        body.br(left, &[join]);
        body.br(right, &[join]);
        let p = body.phi(join, vec![fv, gv]);
        let call = body.call(join, p, vec![]);
        body.ret(join, None);
        call
    };
    let m = mb.finish().unwrap();
    assert_eq!(callees(&m, &run(&m), call), ["f", "g"]);
}

#[test]
fn indirect_through_memory_is_flow_sensitive() {
    let mut mb = ModuleBuilder::new();
    let f = mb.declare("f", &[], Ty::Void).unwrap();
    let g = mb.declare("g", &[], Ty::Void).unwrap();
    let main = mb.declare("main", &[], Ty::Void).unwrap();
    let (fv, gv) = (mb.function_value(f), mb.function_value(g));
    let (first, second) = {
        let mut body = mb.body(main).unwrap();
        let entry = body.block("entry");
        let slot = body.alloca(entry);
        body.store(entry, fv, slot);
        let fp = body.load(entry, slot);
        let first = body.call(entry, fp, vec![]);
        body.store(entry, gv, slot);
        let fp = body.load(entry, slot);
        let second = body.call(entry, fp, vec![]);
        body.ret(entry, None);
        (first, second)
    };
    let m = mb.finish().unwrap();
    let outs = run(&m);
    assert_eq!(callees(&m, &outs, first), ["f"]);
    assert_eq!(callees(&m, &outs, second), ["g"]);
}

#[test]
fn non_pointer_store_is_ignored() {
    let mut mb = ModuleBuilder::new();
    let f = mb.declare("f", &[], Ty::Void).unwrap();
    let main = mb.declare("main", &[], Ty::Void).unwrap();
    let fv = mb.function_value(f);
    let call = {
        let mut body = mb.body(main).unwrap();
        let entry = body.block("entry");
        let slot = body.alloca(entry);
        body.store(entry, fv, slot);
        let zero = body.constant(Ty::Int);
        body.store(entry, zero, slot);
        let fp = body.load(entry, slot);
        let call = body.call(entry, fp, vec![]);
        body.ret(entry, None);
        call
    };
    let m = mb.finish().unwrap();
    assert_eq!(callees(&m, &run(&m), call), ["f"]);
}

#[test]
fn memcpy_copies_through_casts() {
    let mut mb = ModuleBuilder::new();
    let f = mb.declare("f", &[], Ty::Void).unwrap();
    let main = mb.declare("main", &[], Ty::Void).unwrap();
    let fv = mb.function_value(f);
    let call = {
        let mut body = mb.body(main).unwrap();
        let entry = body.block("entry");
        let src = body.alloca(entry);
        body.store(entry, fv, src);
        let dst = body.alloca(entry);
        let cast = body.bitcast(entry, dst);
        body.memcpy(entry, cast, src);
        let fp = body.load(entry, dst);
        let call = body.call(entry, fp, vec![]);
        body.ret(entry, None);
        call
    };
    let m = mb.finish().unwrap();
    assert_eq!(callees(&m, &run(&m), call), ["f"]);
}

#[test]
fn memcpy_from_empty_source_clears_destination() {
    let mut mb = ModuleBuilder::new();
    let f = mb.declare("f", &[], Ty::Void).unwrap();
    let main = mb.declare("main", &[], Ty::Void).unwrap();
    let fv = mb.function_value(f);
    let call = {
        let mut body = mb.body(main).unwrap();
        let entry = body.block("entry");
        let dst = body.alloca(entry);
        body.store(entry, fv, dst);
        let src = body.alloca(entry);
        let cast = body.bitcast(entry, dst);
        body.memcpy(entry, cast, src);
        let fp = body.load(entry, dst);
        let call = body.call(entry, fp, vec![]);
        body.ret(entry, None);
        call
    };
    let m = mb.finish().unwrap();
    assert!(callees(&m, &run(&m), call).is_empty());
}

#[test]
fn field_store_through_one_base_is_strong() {
    let mut mb = ModuleBuilder::new();
    let f = mb.declare("f", &[], Ty::Void).unwrap();
    let g = mb.declare("g", &[], Ty::Void).unwrap();
    let main = mb.declare("main", &[], Ty::Void).unwrap();
    let (fv, gv) = (mb.function_value(f), mb.function_value(g));
    let call = {
        let mut body = mb.body(main).unwrap();
        let entry = body.block("entry");
        let obj = body.alloca(entry);
        let p = body.gep(entry, obj);
        body.store(entry, fv, p);
        let q = body.gep(entry, obj);
        body.store(entry, gv, q);
        let r = body.gep(entry, obj);
        let fp = body.load(entry, r);
        let call = body.call(entry, fp, vec![]);
        body.ret(entry, None);
        call
    };
    let m = mb.finish().unwrap();
    assert_eq!(callees(&m, &run(&m), call), ["g"]);
}

#[test]
fn field_store_through_many_bases_is_weak() {
    let mut mb = ModuleBuilder::new();
    let f = mb.declare("f", &[], Ty::Void).unwrap();
    let h = mb.declare("h", &[], Ty::Void).unwrap();
    let main = mb.declare("main", &[], Ty::Void).unwrap();
    let (fv, hv) = (mb.function_value(f), mb.function_value(h));
    let call = {
        let mut body = mb.body(main).unwrap();
        let entry = body.block("entry");
        let left = body.block("left");
        let right = body.block("right");
        let join = body.block("join");
        let s1 = body.alloca(entry);
        let s2 = body.alloca(entry);
        let slot = body.alloca(entry);
        let q1 = body.gep(entry, s1);
        body.store(entry, hv, q1);
        body.br(entry, &[left, right]);
        body.store(left, s1, slot);
        body.br(left, &[join]);
        body.store(right, s2, slot);
        body.br(right, &[join]);
        let p = body.load(join, slot);
        let field = body.gep(join, p);
        body.store(join, fv, field);
        let r = body.gep(join, s1);
        let fp = body.load(join, r);
        let call = body.call(join, fp, vec![]);
        body.ret(join, None);
        call
    };
    let m = mb.finish().unwrap();
    assert_eq!(callees(&m, &run(&m), call), ["f", "h"]);
}

#[test]
fn function_pointer_argument() {
    let mut mb = ModuleBuilder::new();
    let f = mb.declare("f", &[], Ty::Void).unwrap();
    let apply = mb.declare("apply", &[Ty::Pointer], Ty::Void).unwrap();
    let main = mb.declare("main", &[], Ty::Void).unwrap();
    let (fv, apply_v) = (mb.function_value(f), mb.function_value(apply));
    let fp = mb.param(apply, 0);
    {
        let mut body = mb.body(f).unwrap();
        let entry = body.block("entry");
        body.ret(entry, None);
    }
    let inner = {
        let mut body = mb.body(apply).unwrap();
        let entry = body.block("entry");
        let call = body.call(entry, fp, vec![]);
        body.ret(entry, None);
        call
    };
    {
        let mut body = mb.body(main).unwrap();
        let entry = body.block("entry");
        body.call(entry, apply_v, vec![fv]);
        body.ret(entry, None);
    }
    let m = mb.finish().unwrap();
    let outs = run(&m);
    assert_eq!(callees(&m, &outs, inner), ["f"]);
    assert!(outs.entries[&apply].points_to(fp).unwrap().contains(&fv));
}

/// `init(s)` writes a function pointer into a field of `*s`; the caller
/// reads it back through its own object.
#[test]
fn pointer_parameter_aliasing() {
    let mut mb = ModuleBuilder::new();
    let g = mb.declare("g", &[], Ty::Void).unwrap();
    let init = mb.declare("init", &[Ty::Pointer], Ty::Void).unwrap();
    let main = mb.declare("main", &[], Ty::Void).unwrap();
    let (gv, init_v) = (mb.function_value(g), mb.function_value(init));
    let s = mb.param(init, 0);
    {
        let mut body = mb.body(init).unwrap();
        let entry = body.block("entry");
        let p = body.gep(entry, s);
        body.store(entry, gv, p);
        body.ret(entry, None);
    }
    let (obj, init_call, call) = {
        let mut body = mb.body(main).unwrap();
        let entry = body.block("entry");
        let obj = body.alloca(entry);
        let init_call = body.call(entry, init_v, vec![obj]);
        let q = body.gep(entry, obj);
        let fp = body.load(entry, q);
        let call = body.call(entry, fp, vec![]);
        body.ret(entry, None);
        (obj, init_call, call)
    };
    let m = mb.finish().unwrap();
    let outs = run(&m);
    assert_eq!(callees(&m, &outs, call), ["g"]);
    let after_init = outs.state_after(site(&m, init_call)).unwrap();
    assert!(after_init.field_points_to(obj).unwrap().contains(&gv));
}

#[test]
fn callee_store_through_parameter_reaches_caller() {
    let mut mb = ModuleBuilder::new();
    let f = mb.declare("f", &[], Ty::Void).unwrap();
    let g = mb.declare("g", &[], Ty::Void).unwrap();
    let set = mb.declare("set", &[Ty::Pointer], Ty::Void).unwrap();
    let main = mb.declare("main", &[], Ty::Void).unwrap();
    let (fv, gv, set_v) = (
        mb.function_value(f),
        mb.function_value(g),
        mb.function_value(set),
    );
    let p = mb.param(set, 0);
    {
        let mut body = mb.body(set).unwrap();
        let entry = body.block("entry");
        body.store(entry, gv, p);
        body.ret(entry, None);
    }
    let call = {
        let mut body = mb.body(main).unwrap();
        let entry = body.block("entry");
        let slot = body.alloca(entry);
        body.store(entry, fv, slot);
        body.call(entry, set_v, vec![slot]);
        let fp = body.load(entry, slot);
        let call = body.call(entry, fp, vec![]);
        body.ret(entry, None);
        call
    };
    let m = mb.finish().unwrap();
    assert_eq!(callees(&m, &run(&m), call), ["g"]);
}

#[test]
fn returned_parameter_flows_to_call_result() {
    let mut mb = ModuleBuilder::new();
    let f = mb.declare("f", &[], Ty::Void).unwrap();
    let id = mb.declare("id", &[Ty::Pointer], Ty::Pointer).unwrap();
    let main = mb.declare("main", &[], Ty::Void).unwrap();
    let (fv, id_v) = (mb.function_value(f), mb.function_value(id));
    let x = mb.param(id, 0);
    {
        let mut body = mb.body(f).unwrap();
        let entry = body.block("entry");
        body.ret(entry, None);
    }
    {
        let mut body = mb.body(id).unwrap();
        let entry = body.block("entry");
        body.ret(entry, Some(x));
    }
    let (r, call) = {
        let mut body = mb.body(main).unwrap();
        let entry = body.block("entry");
        let r = body.call(entry, id_v, vec![fv]);
        let call = body.call(entry, r, vec![]);
        body.ret(entry, None);
        (r, call)
    };
    let m = mb.finish().unwrap();
    let outs = run(&m);
    assert_eq!(callees(&m, &outs, call), ["f"]);
    let after = outs.state_after(site(&m, r)).unwrap();
    assert_eq!(after.points_to(r).unwrap().iter().copied().collect::<Vec<_>>(), [fv]);
}

/// `r = id(&y)` must behave exactly like `y` itself.
#[test]
fn pass_through_return_aliases_argument() {
    let mut mb = ModuleBuilder::new();
    let f = mb.declare("f", &[], Ty::Void).unwrap();
    let id = mb.declare("id", &[Ty::Pointer], Ty::Pointer).unwrap();
    let main = mb.declare("main", &[], Ty::Void).unwrap();
    let (fv, id_v) = (mb.function_value(f), mb.function_value(id));
    let x = mb.param(id, 0);
    {
        let mut body = mb.body(id).unwrap();
        let entry = body.block("entry");
        body.ret(entry, Some(x));
    }
    let (through_r, through_y) = {
        let mut body = mb.body(main).unwrap();
        let entry = body.block("entry");
        let y = body.alloca(entry);
        body.store(entry, fv, y);
        let r = body.call(entry, id_v, vec![y]);
        let fp = body.load(entry, r);
        let through_r = body.call(entry, fp, vec![]);
        let fp = body.load(entry, y);
        let through_y = body.call(entry, fp, vec![]);
        body.ret(entry, None);
        (through_r, through_y)
    };
    let m = mb.finish().unwrap();
    let outs = run(&m);
    assert_eq!(callees(&m, &outs, through_r), ["f"]);
    assert_eq!(callees(&m, &outs, through_y), ["f"]);
}

#[test]
fn external_declaration_passes_state_through() {
    let mut mb = ModuleBuilder::new();
    let f = mb.declare("f", &[], Ty::Void).unwrap();
    let ext = mb.declare("ext", &[Ty::Pointer], Ty::Void).unwrap();
    let main = mb.declare("main", &[], Ty::Void).unwrap();
    let (fv, ext_v) = (mb.function_value(f), mb.function_value(ext));
    let (ext_call, call) = {
        let mut body = mb.body(main).unwrap();
        let entry = body.block("entry");
        let slot = body.alloca(entry);
        body.store(entry, fv, slot);
        let ext_call = body.call(entry, ext_v, vec![slot]);
        let fp = body.load(entry, slot);
        let call = body.call(entry, fp, vec![]);
        body.ret(entry, None);
        (ext_call, call)
    };
    let m = mb.finish().unwrap();
    let outs = pointer::analysis(
        &m,
        &Options {
            metrics: true,
            ..Options::default()
        },
    )
    .unwrap();
    assert_eq!(callees(&m, &outs, ext_call), ["ext"]);
    assert_eq!(callees(&m, &outs, call), ["f"]);
    assert!(!outs.entries.contains_key(&ext));
    assert_eq!(outs.metrics.unwrap().dequeues, 1);
}

#[test]
fn unresolved_call_passes_state_through() {
    let mut mb = ModuleBuilder::new();
    let f = mb.declare("f", &[], Ty::Void).unwrap();
    let main = mb.declare("main", &[Ty::Pointer], Ty::Void).unwrap();
    let fv = mb.function_value(f);
    let unknown = mb.param(main, 0);
    let (unknown_call, call) = {
        let mut body = mb.body(main).unwrap();
        let entry = body.block("entry");
        let slot = body.alloca(entry);
        body.store(entry, fv, slot);
        let unknown_call = body.call(entry, unknown, vec![]);
        let fp = body.load(entry, slot);
        let call = body.call(entry, fp, vec![]);
        body.ret(entry, None);
        (unknown_call, call)
    };
    let m = mb.finish().unwrap();
    let outs = run(&m);
    assert!(callees(&m, &outs, unknown_call).is_empty());
    assert_eq!(callees(&m, &outs, call), ["f"]);
}

#[test]
fn mutual_recursion_terminates() {
    let mut mb = ModuleBuilder::new();
    let a = mb.declare("a", &[Ty::Pointer], Ty::Void).unwrap();
    let b = mb.declare("b", &[Ty::Pointer], Ty::Void).unwrap();
    let main = mb.declare("main", &[], Ty::Void).unwrap();
    let (av, bv) = (mb.function_value(a), mb.function_value(b));
    let (pa, pb) = (mb.param(a, 0), mb.param(b, 0));
    let a_call = {
        let mut body = mb.body(a).unwrap();
        let entry = body.block("entry");
        let call = body.call(entry, pa, vec![bv]);
        body.ret(entry, None);
        call
    };
    {
        let mut body = mb.body(b).unwrap();
        let entry = body.block("entry");
        body.call(entry, pb, vec![av]);
        body.ret(entry, None);
    }
    {
        let mut body = mb.body(main).unwrap();
        let entry = body.block("entry");
        body.call(entry, av, vec![bv]);
        body.ret(entry, None);
    }
    let m = mb.finish().unwrap();
    let outs = pointer::analysis(
        &m,
        &Options {
            max_dequeues: Some(1000),
            ..Options::default()
        },
    )
    .unwrap();
    assert!(callees(&m, &outs, a_call).contains(&"b".to_string()));
}

#[test]
fn analysis_is_deterministic() {
    let mut mb = ModuleBuilder::new();
    let f = mb.declare("f", &[], Ty::Void).unwrap();
    let g = mb.declare("g", &[], Ty::Void).unwrap();
    let apply = mb.declare("apply", &[Ty::Pointer], Ty::Void).unwrap();
    let main = mb.declare("main", &[], Ty::Void).unwrap();
    let (fv, gv, apply_v) = (
        mb.function_value(f),
        mb.function_value(g),
        mb.function_value(apply),
    );
    let fp = mb.param(apply, 0);
    {
        let mut body = mb.body(apply).unwrap();
        let entry = body.block("entry");
        body.call_at(entry, fp, vec![], Some(3));
        body.ret(entry, None);
    }
    {
        let mut body = mb.body(main).unwrap();
        let entry = body.block("entry");
        body.call_at(entry, apply_v, vec![fv], Some(7));
        body.call_at(entry, apply_v, vec![gv], Some(8));
        body.ret(entry, None);
    }
    let m = mb.finish().unwrap();
    let first = run(&m);
    let second = run(&m);
    assert_eq!(first.report(&m), second.report(&m));
    assert_eq!(first.dump_states(&m), second.dump_states(&m));
    let lines: Vec<String> = first.report(&m).iter().map(|r| r.to_string()).collect();
    assert_eq!(lines, ["3 : f, g", "7 : apply", "8 : apply"]);
}
