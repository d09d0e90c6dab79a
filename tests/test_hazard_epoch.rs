extern crate core_affinity;
extern crate env_logger;
extern crate rs_elimination;

use rs_elimination::error::Status;
use rs_elimination::hazard_epoch::{BaseHazardNode, HazardEpoch, HazardNodeT};
use rs_elimination::util;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicPtr, Ordering};
use std::sync::Arc;
use std::thread;
use std::time;

struct TestObj {
    base: BaseHazardNode,
    cnt: Arc<AtomicI64>,
    data: Option<i32>,
}

impl HazardNodeT for TestObj {
    unsafe fn base_hazard_node(this: *mut Self) -> *mut BaseHazardNode {
        ptr::addr_of_mut!((*this).base)
    }
}

impl Drop for TestObj {
    fn drop(&mut self) {
        self.data.take().unwrap();
        self.cnt.fetch_sub(1, Ordering::SeqCst);
    }
}

impl TestObj {
    fn new(cnt: &Arc<AtomicI64>) -> TestObj {
        cnt.fetch_add(1, Ordering::SeqCst);
        TestObj {
            base: BaseHazardNode::default(),
            cnt: cnt.clone(),
            data: Some(0),
        }
    }
}

struct GlobalConf {
    stop: AtomicBool,
    cnt: Arc<AtomicI64>,
    read_loops: i64,
    write_loops: i64,
    v: AtomicPtr<TestObj>,
    h: HazardEpoch,
}

fn set_cpu_affinity() {
    let cpus = core_affinity::get_core_ids().unwrap();
    let tid = util::get_thread_id().unwrap() as usize;
    core_affinity::set_for_current(cpus[tid % cpus.len()]);
    println!("set_cpu_affinity {} {}", tid, tid % cpus.len());
}

fn read_thread_func(global_conf: Arc<GlobalConf>) {
    set_cpu_affinity();
    for _ in 0..global_conf.read_loops {
        let guard = global_conf.h.pin().unwrap();
        let v = global_conf.v.load(Ordering::SeqCst);
        assert_eq!(unsafe { (*v).data }, Some(0));
        drop(guard);
    }
}

fn write_thread_func(global_conf: Arc<GlobalConf>) {
    set_cpu_affinity();
    for _ in 0..global_conf.write_loops {
        let v = Box::into_raw(Box::new(TestObj::new(&global_conf.cnt)));
        let old = global_conf.v.swap(v, Ordering::SeqCst);
        unsafe { global_conf.h.add_node(old).unwrap() };
    }
}

fn debug_thread_func(global_conf: Arc<GlobalConf>) {
    while !global_conf.stop.load(Ordering::SeqCst) {
        println!(
            "hazard_waiting_count={}",
            global_conf.h.atomic_load_hazard_waiting_count()
        );
        thread::sleep(time::Duration::from_millis(100));
    }
}

#[test]
fn test_multi_thread() {
    let _ = env_logger::try_init();

    let cpu_count = core_affinity::get_core_ids().unwrap().len().min(8) as i64;

    let read_count = (cpu_count + 1) / 2;
    let write_count = (cpu_count + 1) / 2;

    println!("read thread {}, write thread {}", read_count, write_count);

    let cnt = Arc::new(AtomicI64::new(0));
    let first = Box::into_raw(Box::new(TestObj::new(&cnt)));
    let global_conf = Arc::new(GlobalConf {
        stop: AtomicBool::new(false),
        cnt: cnt.clone(),
        read_loops: 200_000,
        write_loops: 50_000,
        v: AtomicPtr::new(first),
        h: HazardEpoch::default(),
    });

    println!(
        "read loops {}, write loops {}",
        global_conf.read_loops, global_conf.write_loops
    );

    let dpd = {
        let global_conf = global_conf.clone();
        thread::spawn(move || debug_thread_func(global_conf))
    };
    let rpd: Vec<_> = (0..read_count)
        .map(|_| {
            let global_conf = global_conf.clone();
            thread::spawn(move || read_thread_func(global_conf))
        })
        .collect();
    let wpd: Vec<_> = (0..write_count)
        .map(|_| {
            let global_conf = global_conf.clone();
            thread::spawn(move || write_thread_func(global_conf))
        })
        .collect();

    for t in rpd {
        t.join().unwrap();
    }

    println!("read threads joined");

    for t in wpd {
        t.join().unwrap();
    }

    println!("write threads joined");

    global_conf.stop.store(true, Ordering::SeqCst);

    dpd.join().unwrap();

    unsafe {
        drop(Box::from_raw(global_conf.v.load(Ordering::SeqCst)));
    }

    global_conf.h.retire();
    assert_eq!(0, cnt.load(Ordering::SeqCst));
}

#[test]
fn test_base() {
    let he = HazardEpoch::default();
    let cnt = Arc::new(AtomicI64::new(0));
    let handle = he.acquire().unwrap();
    for i in 0..64i64 {
        let tmp = Box::new(TestObj::new(&cnt));
        unsafe { he.add_node(Box::into_raw(tmp)).unwrap() };
        assert_eq!(i + 1, cnt.load(Ordering::SeqCst));
    }
    he.retire();
    assert_eq!(cnt.load(Ordering::SeqCst), 64);
    he.release(handle);
    he.retire();
    assert_eq!(cnt.load(Ordering::SeqCst), 0);

    for i in 0..32i64 {
        unsafe {
            he.add_node(Box::into_raw(Box::new(TestObj::new(&cnt))))
                .unwrap()
        };
        assert_eq!(cnt.load(Ordering::SeqCst), i + 1);
    }

    let handle = he.acquire().unwrap();
    for i in 32..64i64 {
        let tmp = Box::new(TestObj::new(&cnt));
        unsafe { he.add_node(Box::into_raw(tmp)).unwrap() };
        assert_eq!(i + 1, cnt.load(Ordering::SeqCst));
    }

    he.retire();
    assert_eq!(32, cnt.load(Ordering::SeqCst));
    he.release(handle);
    he.retire();
    assert_eq!(cnt.load(Ordering::SeqCst), 0);

    for _ in 0..2i64 {
        let handle = he.acquire().unwrap();
        assert_eq!(he.acquire().err(), Some(Status::Busy));
        he.release(handle);
    }
}

#[test]
fn test_drop_reclaims_everything() {
    let cnt = Arc::new(AtomicI64::new(0));
    let he = HazardEpoch::new(1_000_000, 200_000);
    let handle = he.acquire().unwrap();
    for _ in 0..100 {
        unsafe {
            he.add_node(Box::into_raw(Box::new(TestObj::new(&cnt))))
                .unwrap()
        };
    }
    he.release(handle);
    assert_eq!(cnt.load(Ordering::SeqCst), 100);
    drop(he);
    assert_eq!(cnt.load(Ordering::SeqCst), 0);
}
